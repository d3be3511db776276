//! Object graph (SPEC_FULL.md §4.3's expansion of the reference graph to the
//! data-section side): edges between [`Object`]s that reference one another
//! through an embedded `SymbolOffset` expr, e.g. a vtable atom's item
//! pointing at a function, or one object's initializer pointing at another
//! object's atom. No header for this exists in the retrieval pack (the
//! source folds object-to-object references into the same reference-graph
//! pass this crate splits into `reference_graph`); this module is this
//! crate's own design, built the same SCC-bottom-up way as `call_graph` and
//! `dag` so the global forwarder's object-classification pass (spec §4.4)
//! can iterate objects in dependency order.

use std::collections::HashMap;

use crate::ir::arena::Id;
use crate::ir::data::{Item, Object};
use crate::ir::program::Program;

#[derive(Debug, Clone, Default)]
pub struct ObjectGraphNode {
    pub object: Id<Object>,
    pub refers_to: Vec<Id<Object>>,
    pub referred_by: Vec<Id<Object>>,
}

#[derive(Debug, Default)]
pub struct ObjectGraph {
    pub nodes: Vec<ObjectGraphNode>,
    object_to_node: HashMap<Id<Object>, usize>,
}

impl ObjectGraph {
    pub fn node_of(&self, object: Id<Object>) -> usize {
        self.object_to_node[&object]
    }
}

pub fn build(prog: &Program) -> ObjectGraph {
    let mut nodes = Vec::new();
    let mut object_to_node = HashMap::new();
    for (id, _) in prog.objects.iter() {
        object_to_node.insert(id, nodes.len());
        nodes.push(ObjectGraphNode { object: id, ..Default::default() });
    }

    for (object_id, object) in prog.objects.iter() {
        let from = object_to_node[&object_id];
        for &atom_id in &object.atoms {
            for item in &prog.atoms[atom_id].items {
                if let Item::Expr(e) = item {
                    let expr = prog.expr(*e);
                    if let Some(target_atom) = prog.atom_by_global(expr.symbol()) {
                        let target_object = prog.atoms[target_atom].owner;
                        let to = object_to_node[&target_object];
                        if to != from {
                            if !nodes[from].refers_to.contains(&target_object) {
                                nodes[from].refers_to.push(target_object);
                            }
                            if !nodes[to].referred_by.contains(&object_id) {
                                nodes[to].referred_by.push(object_id);
                            }
                        }
                    }
                }
            }
        }
    }

    ObjectGraph { nodes, object_to_node }
}

/// SCC order (referents before referrers), mirroring `call_graph::scc_order`.
pub fn scc_order(graph: &ObjectGraph) -> Vec<Vec<usize>> {
    struct State {
        index: HashMap<usize, u32>,
        lowlink: HashMap<usize, u32>,
        on_stack: HashMap<usize, bool>,
        stack: Vec<usize>,
        next_index: u32,
        sccs: Vec<Vec<usize>>,
    }

    fn strong_connect(v: usize, graph: &ObjectGraph, st: &mut State) {
        st.index.insert(v, st.next_index);
        st.lowlink.insert(v, st.next_index);
        st.next_index += 1;
        st.stack.push(v);
        st.on_stack.insert(v, true);

        for &obj in &graph.nodes[v].refers_to {
            let w = graph.node_of(obj);
            if !st.index.contains_key(&w) {
                strong_connect(w, graph, st);
                let low = st.lowlink[&v].min(st.lowlink[&w]);
                st.lowlink.insert(v, low);
            } else if *st.on_stack.get(&w).unwrap_or(&false) {
                let low = st.lowlink[&v].min(st.index[&w]);
                st.lowlink.insert(v, low);
            }
        }

        if st.lowlink[&v] == st.index[&v] {
            let mut component = Vec::new();
            while let Some(w) = st.stack.pop() {
                st.on_stack.insert(w, false);
                let done = w == v;
                component.push(w);
                if done {
                    break;
                }
            }
            st.sccs.push(component);
        }
    }

    let mut st = State {
        index: HashMap::new(),
        lowlink: HashMap::new(),
        on_stack: HashMap::new(),
        stack: Vec::new(),
        next_index: 0,
        sccs: Vec::new(),
    };
    for v in 0..graph.nodes.len() {
        if !st.index.contains_key(&v) {
            strong_connect(v, graph, &mut st);
        }
    }
    st.sccs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::data::Atom;
    use crate::ir::expr::Expr;
    use crate::ir::global::{Global, GlobalKind};
    use crate::ir::ty::Visibility;

    #[test]
    fn atom_referencing_another_objects_atom_creates_an_edge() {
        let mut prog = Program::new();

        let target_object = prog.push_object();
        let target_atom = prog.push_atom(Atom::new("target", Visibility::Local, false, target_object));
        let target_global =
            prog.declare_global(Global::new("target", Visibility::Local, false, GlobalKind::Atom(target_atom)));

        let source_object = prog.push_object();
        let mut source_atom = Atom::new("source", Visibility::Local, false, source_object);
        let expr = prog.intern_expr(Expr::SymbolOffset { symbol: target_global, offset: 0 });
        source_atom.items.push(Item::Expr(expr));
        prog.push_atom(source_atom);

        let graph = build(&prog);
        let source_node = graph.node_of(source_object);
        let target_node = graph.node_of(target_object);
        assert!(graph.nodes[source_node].refers_to.contains(&target_object));
        assert!(graph.nodes[target_node].referred_by.contains(&source_object));

        let order = scc_order(&graph);
        let target_pos = order.iter().position(|c| c.contains(&target_node)).unwrap();
        let source_pos = order.iter().position(|c| c.contains(&source_node)).unwrap();
        assert!(target_pos < source_pos);
    }
}
