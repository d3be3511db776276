//! CFG condensation into a DAG of strongly-connected components (spec §4.2).
//! Grounded in the SCC-bottom-up iteration order used throughout
//! `original_source/passes/global_forward/forwarder.cpp` (its `CallGraph`
//! and object-graph SCC passes follow the identical Tarjan shape this module
//! implements once, generically, for any block-level successor relation).

use std::collections::HashMap;

use crate::ir::arena::Id;
use crate::ir::block::Block;
use crate::ir::function::Function;
use crate::ir::inst::InstKind;

#[derive(Debug, Clone)]
pub struct DagNode {
    /// Topological index; lower = earlier in post-order (spec §4.2).
    pub index: usize,
    pub blocks: Vec<Id<Block>>,
    pub is_loop: bool,
    pub is_exit: bool,
    pub is_return: bool,
    pub preds: Vec<usize>,
    pub succs: Vec<usize>,
}

#[derive(Debug)]
pub struct Dag {
    pub nodes: Vec<DagNode>,
    block_to_node: HashMap<Id<Block>, usize>,
}

impl Dag {
    pub fn node_of(&self, block: Id<Block>) -> usize {
        self.block_to_node[&block]
    }

    pub fn entry_node(&self, func: &Function) -> usize {
        self.node_of(func.entry())
    }
}

/// Tarjan's algorithm, returning SCCs in the order they finish (i.e. reverse
/// topological order: sinks first, the entry's component last).
fn tarjan_scc(blocks: &[Id<Block>], successors: impl Fn(Id<Block>) -> Vec<Id<Block>>) -> Vec<Vec<Id<Block>>> {
    struct State {
        index: HashMap<Id<Block>, u32>,
        lowlink: HashMap<Id<Block>, u32>,
        on_stack: HashMap<Id<Block>, bool>,
        stack: Vec<Id<Block>>,
        next_index: u32,
        sccs: Vec<Vec<Id<Block>>>,
    }

    fn strong_connect(v: Id<Block>, st: &mut State, successors: &impl Fn(Id<Block>) -> Vec<Id<Block>>) {
        st.index.insert(v, st.next_index);
        st.lowlink.insert(v, st.next_index);
        st.next_index += 1;
        st.stack.push(v);
        st.on_stack.insert(v, true);

        for w in successors(v) {
            if !st.index.contains_key(&w) {
                strong_connect(w, st, successors);
                let low_w = st.lowlink[&w];
                let low_v = st.lowlink[&v];
                st.lowlink.insert(v, low_v.min(low_w));
            } else if *st.on_stack.get(&w).unwrap_or(&false) {
                let idx_w = st.index[&w];
                let low_v = st.lowlink[&v];
                st.lowlink.insert(v, low_v.min(idx_w));
            }
        }

        if st.lowlink[&v] == st.index[&v] {
            let mut component = Vec::new();
            loop {
                let w = st.stack.pop().expect("stack non-empty while closing a component");
                st.on_stack.insert(w, false);
                component.push(w);
                if w == v {
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
    for &b in blocks {
        if !st.index.contains_key(&b) {
            strong_connect(b, &mut st, &successors);
        }
    }
    st.sccs
}

/// Builds the DAG condensation of `func`'s CFG.
pub fn build(func: &Function) -> Dag {
    let sccs = tarjan_scc(&func.blocks, |b| func.successors(b));

    let mut block_to_node = HashMap::new();
    for (i, component) in sccs.iter().enumerate() {
        for &b in component {
            block_to_node.insert(b, i);
        }
    }

    let mut nodes: Vec<DagNode> = sccs
        .into_iter()
        .enumerate()
        .map(|(i, blocks)| {
            let is_loop = blocks.len() > 1 || func.successors(blocks[0]).contains(&blocks[0]);
            let is_return = blocks.iter().any(|&b| {
                func.terminator(b).is_some_and(|t| matches!(func.insts[t].kind, InstKind::Return))
            });
            DagNode { index: i, blocks, is_loop, is_exit: false, is_return, preds: Vec::new(), succs: Vec::new() }
        })
        .collect();

    let mut edges: Vec<(usize, usize)> = Vec::new();
    for node in &nodes {
        for &b in &node.blocks {
            for succ in func.successors(b) {
                let target = block_to_node[&succ];
                if target != node.index {
                    edges.push((node.index, target));
                }
            }
        }
    }
    for (from, to) in edges {
        if !nodes[from].succs.contains(&to) {
            nodes[from].succs.push(to);
        }
        if !nodes[to].preds.contains(&from) {
            nodes[to].preds.push(from);
        }
    }
    for node in &mut nodes {
        node.is_exit = node.succs.is_empty();
    }

    Dag { nodes, block_to_node }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::function::Function;
    use crate::ir::inst::Inst;
    use crate::ir::ty::CallingConv;

    fn jmp(func: &mut Function, block: Id<Block>, target: Id<Block>) {
        func.add_inst(block, Inst::new(InstKind::Jmp { target }, smallvec::SmallVec::new(), block), None);
    }

    #[test]
    fn straight_line_cfg_has_no_loop_nodes() {
        let mut func = Function::new("f", CallingConv::C);
        let a = func.push_block(Block::new("a"));
        let b = func.push_block(Block::new("b"));
        jmp(&mut func, a, b);
        func.add_inst(b, Inst::new(InstKind::Return, smallvec::SmallVec::new(), b), None);

        let dag = build(&func);
        assert_eq!(dag.nodes.len(), 2);
        assert!(dag.nodes.iter().all(|n| !n.is_loop));
        let exit = &dag.nodes[dag.node_of(b)];
        assert!(exit.is_exit);
        assert!(exit.is_return);
    }

    #[test]
    fn self_loop_block_is_flagged_is_loop() {
        let mut func = Function::new("f", CallingConv::C);
        let a = func.push_block(Block::new("a"));
        jmp(&mut func, a, a);
        let dag = build(&func);
        assert_eq!(dag.nodes.len(), 1);
        assert!(dag.nodes[0].is_loop);
    }
}
