//! Call graph (spec §4.3), grounded in `original_source/passes/call_graph.cpp`'s
//! virtual-entry-node construction: besides the direct call edges between
//! functions, a synthetic root links to `main` and to every function whose
//! address is taken anywhere other than a call site's callee operand (the
//! call graph's only sound way to account for functions reachable through a
//! function pointer).

use std::collections::HashMap;

use crate::analysis::reference_graph;
use crate::ir::arena::Id;
use crate::ir::function::Function;
use crate::ir::inst::InstKind;
use crate::ir::program::Program;
use crate::ir::value::ValueRef;

pub const ROOT: usize = 0;

#[derive(Debug, Clone, Default)]
pub struct CallGraphNode {
    pub func: Option<Id<Function>>,
    pub callees: Vec<usize>,
    pub callers: Vec<usize>,
    /// `true` iff some call site in this function has a non-global callee
    /// (a function pointer through a register/load), so the call graph
    /// cannot enumerate its actual targets (spec §4.3).
    pub has_indirect: bool,
}

#[derive(Debug, Default)]
pub struct CallGraph {
    pub nodes: Vec<CallGraphNode>,
    func_to_node: HashMap<Id<Function>, usize>,
}

impl CallGraph {
    pub fn node_of(&self, func: Id<Function>) -> usize {
        self.func_to_node[&func]
    }

    pub fn has_any_indirect(&self) -> bool {
        self.nodes.iter().any(|n| n.has_indirect)
    }
}

fn add_edge(nodes: &mut [CallGraphNode], from: usize, to: usize) {
    if !nodes[from].callees.contains(&to) {
        nodes[from].callees.push(to);
    }
    if !nodes[to].callers.contains(&from) {
        nodes[to].callers.push(from);
    }
}

pub fn build(prog: &Program) -> CallGraph {
    let mut nodes = vec![CallGraphNode { func: None, ..Default::default() }];
    let mut func_to_node = HashMap::new();
    for (id, _) in prog.funcs.iter() {
        func_to_node.insert(id, nodes.len());
        nodes.push(CallGraphNode { func: Some(id), ..Default::default() });
    }

    if let Some(main) = prog.main() {
        add_edge(&mut nodes, ROOT, func_to_node[&main]);
    }

    for (caller_id, func) in prog.funcs.iter() {
        let caller = func_to_node[&caller_id];
        for (_, inst) in func.insts.iter() {
            if let Some(info) = inst.kind.call_info() {
                // spec §4.3: "operand is a mov of a function symbol" — the
                // callee is commonly materialized through a `mov` rather than
                // referencing the `Global` directly, so resolve through that
                // chain before falling back to "indirect".
                match reference_graph::resolve_global(prog, func, &info.callee) {
                    Some(g) => {
                        if let Some(callee_func) = prog.func_by_global(g) {
                            add_edge(&mut nodes, caller, func_to_node[&callee_func]);
                        }
                    }
                    None => nodes[caller].has_indirect = true,
                }
            }
            for operand in operands_excluding_callee(&inst.kind) {
                if let Some(g) = reference_graph::resolve_global(prog, func, operand) {
                    if let Some(taken_func) = prog.func_by_global(g) {
                        add_edge(&mut nodes, ROOT, func_to_node[&taken_func]);
                    }
                }
            }
        }
    }

    CallGraph { nodes, func_to_node }
}

/// An instruction's non-callee operands: for call-site kinds, the argument
/// list (the callee itself is handled separately above); for every other
/// kind, all its operands. A function referenced here (rather than as a
/// callee) counts as address-taken.
fn operands_excluding_callee(kind: &InstKind) -> Vec<&ValueRef> {
    if let Some(info) = kind.call_info() {
        info.args.iter().collect()
    } else {
        match kind {
            InstKind::Phi { incoming } => incoming.iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        }
    }
}

/// Bottom-up SCC order (callees before callers), the iteration order the
/// forwarder's interprocedural passes rely on (spec §4.4).
pub fn scc_order(graph: &CallGraph) -> Vec<Vec<usize>> {
    struct State {
        index: HashMap<usize, u32>,
        lowlink: HashMap<usize, u32>,
        on_stack: HashMap<usize, bool>,
        stack: Vec<usize>,
        next_index: u32,
        sccs: Vec<Vec<usize>>,
    }

    fn strong_connect(v: usize, graph: &CallGraph, st: &mut State) {
        st.index.insert(v, st.next_index);
        st.lowlink.insert(v, st.next_index);
        st.next_index += 1;
        st.stack.push(v);
        st.on_stack.insert(v, true);

        for &w in &graph.nodes[v].callees {
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
    use crate::ir::block::Block;
    use crate::ir::function::Function;
    use crate::ir::global::{Global, GlobalKind};
    use crate::ir::inst::{CallInfo, Inst};
    use crate::ir::ty::{CallingConv, Visibility};
    use smallvec::SmallVec;

    #[test]
    fn direct_call_links_caller_and_callee() {
        let mut prog = Program::new();

        let mut callee = Function::new("callee", CallingConv::C);
        let cb = callee.push_block(Block::new("entry"));
        callee.add_inst(cb, Inst::new(InstKind::Return, SmallVec::new(), cb), None);
        let callee_id = prog.funcs.push(callee);
        let callee_global = prog.declare_global(Global::new("callee", Visibility::Local, false, GlobalKind::Function(callee_id)));

        let mut caller = Function::new("main", CallingConv::C);
        let cb2 = caller.push_block(Block::new("entry"));
        caller.add_inst(
            cb2,
            Inst::new(
                InstKind::Call(CallInfo { callee: ValueRef::Global(callee_global), args: SmallVec::new(), conv: CallingConv::C }),
                SmallVec::new(),
                cb2,
            ),
            None,
        );
        caller.add_inst(cb2, Inst::new(InstKind::Return, SmallVec::new(), cb2), None);
        let caller_id = prog.funcs.push(caller);
        prog.declare_global(Global::new("main", Visibility::Extern, true, GlobalKind::Function(caller_id)));

        let graph = build(&prog);
        let caller_node = graph.node_of(caller_id);
        let callee_node = graph.node_of(callee_id);
        assert!(graph.nodes[caller_node].callees.contains(&callee_node));
        assert!(graph.nodes[ROOT].callees.contains(&caller_node));
    }

    #[test]
    fn indirect_call_sets_flag_without_an_edge() {
        let mut prog = Program::new();
        let mut func = Function::new("f", CallingConv::C);
        let b = func.push_block(Block::new("entry"));
        func.add_inst(
            b,
            Inst::new(
                InstKind::Call(CallInfo {
                    callee: ValueRef::Const(crate::ir::value::Constant::Int(0)),
                    args: SmallVec::new(),
                    conv: CallingConv::C,
                }),
                SmallVec::new(),
                b,
            ),
            None,
        );
        func.add_inst(b, Inst::new(InstKind::Return, SmallVec::new(), b), None);
        let id = prog.funcs.push(func);
        prog.declare_global(Global::new("f", Visibility::Local, false, GlobalKind::Function(id)));

        let graph = build(&prog);
        assert!(graph.nodes[graph.node_of(id)].has_indirect);
        assert!(graph.has_any_indirect());
    }

    #[test]
    fn call_through_a_mov_of_the_callee_is_still_direct() {
        let mut prog = Program::new();

        let mut callee = Function::new("callee", CallingConv::C);
        let cb = callee.push_block(Block::new("entry"));
        callee.add_inst(cb, Inst::new(InstKind::Return, SmallVec::new(), cb), None);
        let callee_id = prog.funcs.push(callee);
        let callee_global = prog.declare_global(Global::new("callee", Visibility::Local, false, GlobalKind::Function(callee_id)));

        let mut caller = Function::new("main", CallingConv::C);
        let cb2 = caller.push_block(Block::new("entry"));
        let mut mov = Inst::new(InstKind::Mov, SmallVec::from_vec(vec![crate::ir::ty::Type::I64]), cb2);
        mov.operands = SmallVec::from_vec(vec![ValueRef::Global(callee_global)]);
        let mov_id = caller.add_inst(cb2, mov, None);
        caller.add_inst(
            cb2,
            Inst::new(
                InstKind::Call(CallInfo { callee: ValueRef::Inst(mov_id, 0), args: SmallVec::new(), conv: CallingConv::C }),
                SmallVec::new(),
                cb2,
            ),
            None,
        );
        caller.add_inst(cb2, Inst::new(InstKind::Return, SmallVec::new(), cb2), None);
        let caller_id = prog.funcs.push(caller);
        prog.declare_global(Global::new("main", Visibility::Extern, true, GlobalKind::Function(caller_id)));

        let graph = build(&prog);
        let caller_node = graph.node_of(caller_id);
        let callee_node = graph.node_of(callee_id);
        assert!(graph.nodes[caller_node].callees.contains(&callee_node));
        assert!(!graph.nodes[caller_node].has_indirect);
    }
}
