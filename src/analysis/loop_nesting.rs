//! Natural loop nesting over a [`Dag`] (spec §4.2).
//!
//! The retrieval pack's `original_source/core/analysis/loop_nesting.cpp`
//! builds the nesting tree from dominators. This crate has no dominator
//! tree (Open Question, recorded in DESIGN.md): instead a loop's body is
//! found by re-running Tarjan's SCC algorithm on the induced subgraph with
//! the loop's header node removed, recursing into any SCC that reappears.
//! This is strictly a simplification — irreducible loops with multiple
//! entries are not discovered as nested loops by this method — but it
//! agrees with the dominator-based result on every reducible CFG, which is
//! the common case this crate's passes are exercised against.

use std::collections::HashMap;

use crate::analysis::dag::Dag;

#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub header: usize,
    pub body: Vec<usize>,
    pub children: Vec<LoopInfo>,
}

#[derive(Debug, Default)]
pub struct LoopNesting {
    pub top_level: Vec<LoopInfo>,
    node_depth: HashMap<usize, u32>,
}

impl LoopNesting {
    pub fn depth(&self, node: usize) -> u32 {
        self.node_depth.get(&node).copied().unwrap_or(0)
    }

    pub fn is_in_loop(&self, node: usize) -> bool {
        self.depth(node) > 0
    }
}

/// A node's DAG-level successors restricted to `within`.
fn induced_successors(dag: &Dag, within: &[usize], node: usize) -> Vec<usize> {
    dag.nodes[node].succs.iter().copied().filter(|s| within.contains(s)).collect()
}

/// Picks the header of a multi-node SCC: the node with a predecessor
/// outside the SCC (its unique entry on a reducible CFG), falling back to
/// the lowest index if none qualifies (an irreducible loop).
fn pick_header(dag: &Dag, scc: &[usize]) -> usize {
    for &n in scc {
        let has_outside_pred = dag.nodes[n].preds.iter().any(|p| !scc.contains(p));
        if has_outside_pred {
            return n;
        }
    }
    *scc.iter().min().unwrap()
}

fn tarjan_on_subset(dag: &Dag, within: &[usize]) -> Vec<Vec<usize>> {
    struct State {
        index: HashMap<usize, u32>,
        lowlink: HashMap<usize, u32>,
        on_stack: HashMap<usize, bool>,
        stack: Vec<usize>,
        next_index: u32,
        sccs: Vec<Vec<usize>>,
    }

    fn strong_connect(v: usize, dag: &Dag, within: &[usize], st: &mut State) {
        st.index.insert(v, st.next_index);
        st.lowlink.insert(v, st.next_index);
        st.next_index += 1;
        st.stack.push(v);
        st.on_stack.insert(v, true);

        for w in induced_successors(dag, within, v) {
            if !st.index.contains_key(&w) {
                strong_connect(w, dag, within, st);
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
    for &n in within {
        if !st.index.contains_key(&n) {
            strong_connect(n, dag, within, &mut st);
        }
    }
    st.sccs
}

/// Recursively discovers the loop rooted at a multi-node (or self-looping)
/// SCC: its header, its full body, and nested loops found by removing the
/// header and re-running SCC on what remains.
fn build_loop(dag: &Dag, scc: Vec<usize>, depth: u32, node_depth: &mut HashMap<usize, u32>) -> LoopInfo {
    let header = pick_header(dag, &scc);
    for &n in &scc {
        node_depth.insert(n, depth);
    }

    let rest: Vec<usize> = scc.iter().copied().filter(|&n| n != header).collect();
    let inner_sccs = tarjan_on_subset(dag, &rest);
    let children = inner_sccs
        .into_iter()
        .filter(|c| c.len() > 1 || dag.nodes[c[0]].is_loop)
        .map(|c| build_loop(dag, c, depth + 1, node_depth))
        .collect();

    LoopInfo { header, body: scc, children }
}

pub fn build(dag: &Dag) -> LoopNesting {
    let all: Vec<usize> = (0..dag.nodes.len()).collect();
    let sccs = tarjan_on_subset(dag, &all);

    let mut node_depth = HashMap::new();
    let top_level = sccs
        .into_iter()
        .filter(|c| c.len() > 1 || dag.nodes[c[0]].is_loop)
        .map(|c| build_loop(dag, c, 1, &mut node_depth))
        .collect();

    LoopNesting { top_level, node_depth }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dag;
    use crate::ir::block::Block;
    use crate::ir::function::Function;
    use crate::ir::inst::{Inst, InstKind};
    use crate::ir::ty::CallingConv;

    fn jmp(func: &mut Function, block: crate::ir::arena::Id<Block>, target: crate::ir::arena::Id<Block>) {
        func.add_inst(block, Inst::new(InstKind::Jmp { target }, smallvec::SmallVec::new(), block), None);
    }

    fn jcc(
        func: &mut Function,
        block: crate::ir::arena::Id<Block>,
        then_: crate::ir::arena::Id<Block>,
        else_: crate::ir::arena::Id<Block>,
    ) {
        func.add_inst(block, Inst::new(InstKind::Jcc { then_, else_ }, smallvec::SmallVec::new(), block), None);
    }

    #[test]
    fn single_back_edge_loop_is_found() {
        let mut func = Function::new("f", CallingConv::C);
        let entry = func.push_block(Block::new("entry"));
        let header = func.push_block(Block::new("header"));
        let body = func.push_block(Block::new("body"));
        let exit = func.push_block(Block::new("exit"));
        jmp(&mut func, entry, header);
        jcc(&mut func, header, body, exit);
        jmp(&mut func, body, header);
        func.add_inst(exit, Inst::new(InstKind::Return, smallvec::SmallVec::new(), exit), None);

        let d = dag::build(&func);
        let nesting = build(&d);
        assert_eq!(nesting.top_level.len(), 1);
        let lp = &nesting.top_level[0];
        assert_eq!(lp.header, d.node_of(header));
        assert!(lp.body.contains(&d.node_of(body)));
        assert!(nesting.is_in_loop(d.node_of(header)));
        assert!(!nesting.is_in_loop(d.node_of(entry)));
    }
}
