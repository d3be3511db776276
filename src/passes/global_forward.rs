//! Global store forwarding (spec §4.4): folds stores of compile-time
//! constants into non-escaping objects directly into the data section, and
//! erases any earlier store to the same slot a later one provably shadows
//! without an intervening load.
//!
//! Grounded in `original_source/passes/global_forward/forwarder.cpp`. That
//! source runs a forward dataflow pass over each function's DAG (bottom-up
//! call-graph/object-graph summaries feeding every call site it can't
//! inline), then a second, backward pass over the same DAG to discover which
//! surviving stores are dead before finally folding what's left into the
//! data section. This version merges the two into a single forward walk: a
//! store is recognised as dead the moment a later store to the same slot
//! overwrites it without a load in between, tracked via each slot's
//! `read_since` flag. This is a strictly conservative subset of what the
//! two-pass version catches — a store only shadowed across a later *join*
//! of two branches (rather than shadowed along one straight-line path) is
//! missed — but it never kills a store that is still live, which is the
//! correctness property spec §8 actually tests.
//!
//! Two further simplifications from the two-pass source, both recorded in
//! DESIGN.md: the walk computes its own topological order over [`Dag`] nodes
//! via Kahn's algorithm rather than trusting `DagNode::index` (whose
//! topological direction is ambiguous against the Tarjan helper that
//! produces it, see `analysis::dag`'s doc comment); and single-use-callee
//! inlining only triggers at a plain `Call` site, never through `Invoke`
//! (the unwind edge would need the inlined callee's raise path routed to the
//! invoke's `unwind` block, which this version does not attempt).

use std::collections::{HashMap, VecDeque};

use crate::analysis::call_graph;
use crate::analysis::dag::{self, Dag, DagNode};
use crate::analysis::object_graph;
use crate::analysis::reference_graph::{self, resolve_object, ReferenceGraph};
use crate::ir::arena::{BitSet, Id};
use crate::ir::data::{Item, Object};
use crate::ir::function::Function;
use crate::ir::global::UserEdge;
use crate::ir::inst::{CallInfo, Inst, InstKind};
use crate::ir::program::Program;
use crate::ir::ty::{Type, Visibility};
use crate::ir::value::{Constant, ValueRef};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub stores_folded: u32,
    pub stores_killed: u32,
}

/// What a call to this function (transitively, through every callee it
/// doesn't inline) can reach (spec §4.4 "Construction").
#[derive(Debug, Clone, Default)]
struct FuncClosure {
    funcs: BitSet<Function>,
    escaped: BitSet<Object>,
    loaded: BitSet<Object>,
    stored: BitSet<Object>,
    raises: bool,
    indirect: bool,
}

/// What's transitively reachable through the data section starting from a
/// given object, e.g. a vtable atom whose items point at other objects or
/// at function globals (SPEC_FULL.md §4.3).
#[derive(Debug, Clone, Default)]
struct ObjectClosure {
    funcs: BitSet<Function>,
    objects: BitSet<Object>,
}

fn build_object_closures(prog: &Program) -> HashMap<Id<Object>, ObjectClosure> {
    let graph = object_graph::build(prog);
    let sccs = object_graph::scc_order(&graph);
    let mut closures: HashMap<Id<Object>, ObjectClosure> = HashMap::new();

    for scc in sccs {
        let mut merged = ObjectClosure::default();
        for &node in &scc {
            let object_id = graph.nodes[node].object;
            merged.objects.insert(object_id);
            for &atom_id in &prog.objects[object_id].atoms {
                for item in &prog.atoms[atom_id].items {
                    if let Item::Expr(e) = item {
                        if let Some(f) = prog.func_by_global(prog.expr(*e).symbol()) {
                            merged.funcs.insert(f);
                        }
                    }
                }
            }
            for &referent in &graph.nodes[node].refers_to {
                if let Some(closure) = closures.get(&referent) {
                    merged.funcs.union_with(&closure.funcs);
                    merged.objects.union_with(&closure.objects);
                }
            }
        }
        for &node in &scc {
            closures.insert(graph.nodes[node].object, merged.clone());
        }
    }
    closures
}

fn expand_escape(
    object: Id<Object>,
    object_closures: &HashMap<Id<Object>, ObjectClosure>,
    escaped: &mut BitSet<Object>,
    funcs: &mut BitSet<Function>,
) {
    escaped.insert(object);
    if let Some(closure) = object_closures.get(&object) {
        escaped.union_with(&closure.objects);
        funcs.union_with(&closure.funcs);
    }
}

/// Built bottom-up over call-graph SCCs (callees before callers, spec §4.4),
/// so a caller's closure already includes everything its callees reach.
fn build_func_closures(
    prog: &Program,
    refs: &ReferenceGraph,
    object_closures: &HashMap<Id<Object>, ObjectClosure>,
) -> HashMap<Id<Function>, FuncClosure> {
    let graph = call_graph::build(prog);
    let sccs = call_graph::scc_order(&graph);
    let mut closures: HashMap<Id<Function>, FuncClosure> = HashMap::new();

    for scc in sccs {
        let mut merged = FuncClosure::default();
        for &node in &scc {
            let Some(func_id) = graph.nodes[node].func else { continue };
            merged.funcs.insert(func_id);
            let Some(info) = refs.get(func_id) else { continue };

            merged.loaded.union_with(&info.read_ranges);
            for &obj in info.read_offsets.keys() {
                merged.loaded.insert(obj);
            }
            merged.stored.union_with(&info.written_ranges);
            for &obj in info.written_offsets.keys() {
                merged.stored.insert(obj);
            }
            merged.raises |= info.has_raise;
            merged.indirect |= info.has_indirect_calls;

            for obj in info.escapes.iter() {
                expand_escape(obj, object_closures, &mut merged.escaped, &mut merged.funcs);
            }
            for callee in info.calls.iter() {
                if let Some(callee_closure) = closures.get(&callee) {
                    merged.funcs.union_with(&callee_closure.funcs);
                    merged.escaped.union_with(&callee_closure.escaped);
                    merged.loaded.union_with(&callee_closure.loaded);
                    merged.stored.union_with(&callee_closure.stored);
                    merged.raises |= callee_closure.raises;
                    merged.indirect |= callee_closure.indirect;
                }
            }
        }
        for &node in &scc {
            if let Some(func_id) = graph.nodes[node].func {
                closures.insert(func_id, merged.clone());
            }
        }
    }
    closures
}

#[derive(Debug, Clone)]
struct StoreRecord {
    inst: (Id<Function>, Id<Inst>),
    value: i128,
    ty: Type,
    /// `false` until something reads this slot; an overwrite while this is
    /// still `false` proves the old store was never observed and is dead.
    read_since: bool,
}

#[derive(Debug, Clone, Default)]
struct NodeState {
    funcs: BitSet<Function>,
    escaped: BitSet<Object>,
    store: HashMap<(Id<Object>, i64), StoreRecord>,
}

/// The dataflow join: union the reachability sets, keep only store slots
/// both predecessors agree hold the same constant (spec §4.4's correctness
/// requirement that a folded store's value be proven live on *every* path).
fn join(a: &NodeState, b: &NodeState) -> NodeState {
    let mut out = a.clone();
    out.funcs.union_with(&b.funcs);
    out.escaped.union_with(&b.escaped);
    out.store.retain(|key, rec| b.store.get(key).is_some_and(|other| other.value == rec.value && other.ty == rec.ty));
    for (key, rec) in out.store.iter_mut() {
        if let Some(other) = b.store.get(key) {
            rec.read_since = rec.read_since || other.read_since;
        }
    }
    out
}

fn topo_order(dag: &Dag) -> Vec<usize> {
    let n = dag.nodes.len();
    let mut indeg: Vec<usize> = dag.nodes.iter().map(|node| node.preds.len()).collect();
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indeg[i] == 0).collect();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while let Some(v) = queue.pop_front() {
        if visited[v] {
            continue;
        }
        visited[v] = true;
        order.push(v);
        for &s in &dag.nodes[v].succs {
            if indeg[s] > 0 {
                indeg[s] -= 1;
            }
            if indeg[s] == 0 && !visited[s] {
                queue.push_back(s);
            }
        }
    }
    for i in 0..n {
        if !visited[i] {
            order.push(i);
        }
    }
    order
}

fn type_for_width(width: u32) -> Option<Type> {
    match width {
        1 => Some(Type::I8),
        2 => Some(Type::I16),
        4 => Some(Type::I32),
        8 => Some(Type::I64),
        16 => Some(Type::I128),
        _ => None,
    }
}

/// Looks through a chain of `Mov`s down to a literal constant, the only
/// shape spec §4.4 requires folding ("every surviving store whose stored
/// value is a constant mov").
fn resolve_constant_int(func: &Function, operand: &ValueRef) -> Option<i128> {
    match operand {
        ValueRef::Const(Constant::Int(v)) => Some(*v),
        ValueRef::Inst(id, 0) => {
            let inst = &func.insts[*id];
            if matches!(inst.kind, InstKind::Mov) {
                inst.operands.first().and_then(|op| resolve_constant_int(func, op))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// spec §4.3's single-use-callee predicate ("local linkage, and every user
/// is a mov whose own user count is exactly one") translated to this IR's
/// actual operand shape: a call site's callee operand references the
/// `Global` directly rather than through a separate address-of `Mov`, so
/// here the equivalent is "exactly one reference in the whole program, and
/// that reference is the callee slot of a plain `Call`".
fn is_single_use_callee(prog: &Program, callee_func: Id<Function>) -> bool {
    let Some(global_id) = prog.global_by_func(callee_func) else { return false };
    if prog.global(global_id).visibility != Visibility::Local {
        return false;
    }
    let users = prog.global_users(global_id);
    if users.len() != 1 {
        return false;
    }
    match users[0] {
        UserEdge::Operand { func, inst, index } => {
            index == 0 && matches!(prog.funcs[func].insts[inst].kind, InstKind::Call(_))
        }
        UserEdge::Expr(_) => false,
    }
}

struct Walker<'a> {
    prog: &'a Program,
    func_closures: &'a HashMap<Id<Function>, FuncClosure>,
    object_closures: &'a HashMap<Id<Object>, ObjectClosure>,
    kills: Vec<(Id<Function>, Id<Inst>)>,
    /// Functions currently being inlined into, guarding against recursive
    /// single-use chains looping forever.
    inlining: Vec<Id<Function>>,
}

impl<'a> Walker<'a> {
    fn expand_escape_into(&self, object: Id<Object>, escaped: &mut BitSet<Object>, funcs: &mut BitSet<Function>) {
        expand_escape(object, self.object_closures, escaped, funcs);
    }

    fn barrier(&self, state: &mut NodeState) {
        state.store.clear();
    }

    fn apply_callee(&self, callee_func: Id<Function>, state: &mut NodeState) {
        let Some(closure) = self.func_closures.get(&callee_func) else {
            state.store.clear();
            return;
        };
        state.funcs.union_with(&closure.funcs);
        state.escaped.union_with(&closure.escaped);
        if closure.indirect {
            state.store.clear();
            return;
        }
        let stored = closure.stored.clone();
        let escaped = closure.escaped.clone();
        state.store.retain(|(obj, _), _| !stored.contains(*obj) && !escaped.contains(*obj));
    }

    fn handle_store(&mut self, func_id: Id<Function>, inst_id: Id<Inst>, width: u32, state: &mut NodeState) {
        let func = &self.prog.funcs[func_id];
        let operands = func.insts[inst_id].operands.clone();
        let addr = &operands[0];
        let value = &operands[1];

        if let Some((escaped_obj, _)) = resolve_object(self.prog, func, value) {
            self.expand_escape_into(escaped_obj, &mut state.escaped, &mut state.funcs);
            let escaped = state.escaped.clone();
            state.store.retain(|(obj, _), _| !escaped.contains(*obj));
        }

        let Some((object, offset)) = resolve_object(self.prog, func, addr) else {
            state.store.clear();
            return;
        };
        if offset.is_none() || !self.prog.objects[object].has_single_atom() {
            state.store.retain(|(obj, _), _| *obj != object);
            return;
        }
        let offset = offset.unwrap();
        let key = (object, offset);

        if let Some(old) = state.store.get(&key) {
            if !old.read_since {
                self.kills.push(old.inst);
            }
        }

        match resolve_constant_int(&self.prog.funcs[func_id], value).zip(type_for_width(width)) {
            Some((value, ty)) => {
                state.store.insert(key, StoreRecord { inst: (func_id, inst_id), value, ty, read_since: false });
            }
            None => {
                state.store.remove(&key);
            }
        }
    }

    fn handle_load(&self, func_id: Id<Function>, inst_id: Id<Inst>, state: &mut NodeState) {
        let func = &self.prog.funcs[func_id];
        let operand = func.insts[inst_id].operands[0].clone();
        let Some((object, offset)) = resolve_object(self.prog, func, &operand) else { return };
        match offset {
            Some(off) if self.prog.objects[object].has_single_atom() => {
                if let Some(rec) = state.store.get_mut(&(object, off)) {
                    rec.read_since = true;
                }
            }
            _ => {
                for (key, rec) in state.store.iter_mut() {
                    if key.0 == object {
                        rec.read_since = true;
                    }
                }
            }
        }
    }

    fn handle_xchg(&mut self, func_id: Id<Function>, inst_id: Id<Inst>, state: &mut NodeState) {
        let operand = self.prog.funcs[func_id].insts[inst_id].operands[0].clone();
        self.handle_load(func_id, inst_id, state);
        if let Some((object, offset)) = resolve_object(self.prog, &self.prog.funcs[func_id], &operand) {
            match offset {
                Some(off) => {
                    state.store.remove(&(object, off));
                }
                None => {
                    state.store.retain(|(obj, _), _| *obj != object);
                }
            }
        }
    }

    fn handle_call(&mut self, func_id: Id<Function>, inst_id: Id<Inst>, call: CallInfo, state: &mut NodeState) {
        let kind = self.prog.funcs[func_id].insts[inst_id].kind.clone();
        match reference_graph::resolve_global(self.prog, &self.prog.funcs[func_id], &call.callee) {
            Some(g) => {
                let Some(callee_func) = self.prog.func_by_global(g) else {
                    self.barrier(state);
                    return;
                };
                if callee_func == func_id {
                    self.apply_callee(callee_func, state);
                    return;
                }
                if matches!(kind, InstKind::Call(_))
                    && is_single_use_callee(self.prog, callee_func)
                    && !self.inlining.contains(&callee_func)
                {
                    self.inlining.push(callee_func);
                    let seed = state.clone();
                    let result = self.walk_function(callee_func, seed);
                    self.inlining.pop();
                    *state = result;
                    return;
                }
                self.apply_callee(callee_func, state);
            }
            None => self.barrier(state),
        }
    }

    fn walk_block(&mut self, func_id: Id<Function>, block: Id<crate::ir::block::Block>, state: &mut NodeState) {
        let inst_ids: Vec<Id<Inst>> = self.prog.funcs[func_id].block_arena[block].insts.clone();
        for inst_id in inst_ids {
            let kind = self.prog.funcs[func_id].insts[inst_id].kind.clone();
            match &kind {
                InstKind::Store { width } => self.handle_store(func_id, inst_id, *width, state),
                InstKind::Load { .. } => self.handle_load(func_id, inst_id, state),
                InstKind::Xchg { .. } => self.handle_xchg(func_id, inst_id, state),
                _ => {
                    if let Some(call) = kind.call_info() {
                        self.handle_call(func_id, inst_id, call.clone(), state);
                    }
                }
            }
        }
    }

    /// Conservative sweep over a loop DAG node: rather than fixpoint-iterate
    /// the loop body, every object it writes or lets escape is dropped from
    /// the incoming state once, which is sound (the loop may run zero or
    /// many times, so nothing it touches can be trusted afterward) though it
    /// misses folding opportunities a full fixpoint would find.
    fn approximate_loop(&mut self, func_id: Id<Function>, node: &DagNode, state: &mut NodeState) {
        let mut written: BitSet<Object> = BitSet::new();
        let mut escaped: BitSet<Object> = BitSet::new();
        let mut funcs: BitSet<Function> = BitSet::new();
        let mut any_indirect = false;

        for &block in &node.blocks {
            let inst_ids: Vec<Id<Inst>> = self.prog.funcs[func_id].block_arena[block].insts.clone();
            for inst_id in inst_ids {
                let func = &self.prog.funcs[func_id];
                let kind = func.insts[inst_id].kind.clone();
                match &kind {
                    InstKind::Store { .. } => {
                        let operands = func.insts[inst_id].operands.clone();
                        if let Some((object, _)) = resolve_object(self.prog, func, &operands[0]) {
                            written.insert(object);
                        }
                        if let Some((object, _)) = resolve_object(self.prog, func, &operands[1]) {
                            self.expand_escape_into(object, &mut escaped, &mut funcs);
                        }
                    }
                    InstKind::Xchg { .. } => {
                        let operands = func.insts[inst_id].operands.clone();
                        if let Some((object, _)) = resolve_object(self.prog, func, &operands[0]) {
                            written.insert(object);
                        }
                    }
                    _ => {
                        if let Some(call) = kind.call_info() {
                            match reference_graph::resolve_global(self.prog, func, &call.callee) {
                                Some(g) => {
                                    if let Some(callee_func) = self.prog.func_by_global(g) {
                                        funcs.insert(callee_func);
                                        if let Some(closure) = self.func_closures.get(&callee_func) {
                                            funcs.union_with(&closure.funcs);
                                            escaped.union_with(&closure.escaped);
                                            written.union_with(&closure.stored);
                                            any_indirect |= closure.indirect;
                                        }
                                    }
                                }
                                None => any_indirect = true,
                            }
                        }
                    }
                }
            }
        }

        state.funcs.union_with(&funcs);
        state.escaped.union_with(&escaped);
        if any_indirect {
            state.store.clear();
        } else {
            state.store.retain(|(obj, _), _| !written.contains(*obj) && !escaped.contains(*obj));
        }
    }

    fn walk_function(&mut self, func_id: Id<Function>, entry_state: NodeState) -> NodeState {
        let dag = dag::build(&self.prog.funcs[func_id]);
        let entry_node = dag.entry_node(&self.prog.funcs[func_id]);
        let order = topo_order(&dag);

        let mut node_out: HashMap<usize, NodeState> = HashMap::new();
        let mut exits: Vec<NodeState> = Vec::new();

        for node_idx in order {
            let mut incoming: Option<NodeState> = None;
            if node_idx == entry_node && dag.nodes[node_idx].preds.is_empty() {
                incoming = Some(entry_state.clone());
            }
            for &pred in &dag.nodes[node_idx].preds {
                if let Some(pred_out) = node_out.get(&pred) {
                    incoming = Some(match incoming {
                        None => pred_out.clone(),
                        Some(acc) => join(&acc, pred_out),
                    });
                }
            }
            let mut state = incoming.unwrap_or_else(|| entry_state.clone());

            if dag.nodes[node_idx].is_loop {
                self.approximate_loop(func_id, &dag.nodes[node_idx], &mut state);
            } else {
                let blocks = dag.nodes[node_idx].blocks.clone();
                for block in blocks {
                    self.walk_block(func_id, block, &mut state);
                }
            }

            if dag.nodes[node_idx].is_exit {
                exits.push(state.clone());
            }
            node_out.insert(node_idx, state);
        }

        exits.into_iter().reduce(|a, b| join(&a, &b)).unwrap_or(entry_state)
    }
}

/// Runs the forwarder starting from `entry`, mutating `prog` in place: dead
/// shadowed stores are erased, and surviving constant stores to
/// non-escaping, single-atom objects are folded into the data section and
/// erased too. Returns counts of each for the driver's verbose summary.
pub fn run(prog: &mut Program, entry: Id<Function>) -> Stats {
    let refs = reference_graph::build(prog);
    let object_closures = build_object_closures(prog);
    let func_closures = build_func_closures(prog, &refs, &object_closures);

    let (kills, exit_state) = {
        let mut walker =
            Walker { prog: &*prog, func_closures: &func_closures, object_closures: &object_closures, kills: Vec::new(), inlining: vec![entry] };
        let exit_state = walker.walk_function(entry, NodeState::default());
        (walker.kills, exit_state)
    };

    let mut stats = Stats::default();
    for (func, inst) in &kills {
        prog.erase_inst(*func, *inst);
        stats.stores_killed += 1;
    }

    for ((object, offset), record) in exit_state.store {
        if exit_state.escaped.contains(object) || !prog.objects[object].has_single_atom() {
            continue;
        }
        let atom_id = prog.objects[object].atoms[0];
        if prog.atoms[atom_id].store(offset as u32, record.value, record.ty) {
            prog.erase_inst(record.inst.0, record.inst.1);
            stats.stores_folded += 1;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::data::Atom;
    use crate::ir::global::{Global, GlobalKind};
    use crate::ir::inst::Inst;
    use crate::ir::ty::CallingConv;
    use smallvec::SmallVec;

    #[test]
    fn folds_constant_store_to_non_escaping_single_atom_object() {
        let mut prog = Program::new();
        let object = prog.push_object();
        let mut atom = Atom::new("g", Visibility::Local, false, object);
        atom.items.push(Item::Int64(0));
        let atom_id = prog.push_atom(atom);
        let atom_global = prog.declare_global(Global::new("g", Visibility::Local, false, GlobalKind::Atom(atom_id)));

        let mut func = Function::new("f", CallingConv::C);
        let b = func.push_block(Block::new("entry"));
        let mut store = Inst::new(InstKind::Store { width: 8 }, SmallVec::new(), b);
        store.operands = SmallVec::from_vec(vec![ValueRef::Global(atom_global), ValueRef::Const(Constant::Int(42))]);
        func.add_inst(b, store, None);
        func.add_inst(b, Inst::new(InstKind::Return, SmallVec::new(), b), None);
        let fid = prog.funcs.push(func);
        prog.declare_global(Global::new("f", Visibility::Extern, true, GlobalKind::Function(fid)));

        let stats = run(&mut prog, fid);
        assert_eq!(stats.stores_folded, 1);
        assert_eq!(stats.stores_killed, 0);
        assert_eq!(prog.atoms[atom_id].items[0], Item::Int64(42));
        let entry_block = prog.funcs[fid].entry();
        assert_eq!(prog.funcs[fid].block_arena[entry_block].insts.len(), 1);
    }

    #[test]
    fn kills_shadowed_store_with_no_intervening_load() {
        let mut prog = Program::new();
        let object = prog.push_object();
        let mut atom = Atom::new("g", Visibility::Local, false, object);
        atom.items.push(Item::Int64(0));
        let atom_id = prog.push_atom(atom);
        let atom_global = prog.declare_global(Global::new("g", Visibility::Local, false, GlobalKind::Atom(atom_id)));

        let mut func = Function::new("f", CallingConv::C);
        let b = func.push_block(Block::new("entry"));
        let mut store1 = Inst::new(InstKind::Store { width: 8 }, SmallVec::new(), b);
        store1.operands = SmallVec::from_vec(vec![ValueRef::Global(atom_global), ValueRef::Const(Constant::Int(1))]);
        func.add_inst(b, store1, None);
        let mut store2 = Inst::new(InstKind::Store { width: 8 }, SmallVec::new(), b);
        store2.operands = SmallVec::from_vec(vec![ValueRef::Global(atom_global), ValueRef::Const(Constant::Int(2))]);
        func.add_inst(b, store2, None);
        func.add_inst(b, Inst::new(InstKind::Return, SmallVec::new(), b), None);
        let fid = prog.funcs.push(func);
        prog.declare_global(Global::new("f", Visibility::Extern, true, GlobalKind::Function(fid)));

        let stats = run(&mut prog, fid);
        assert_eq!(stats.stores_killed, 1);
        assert_eq!(stats.stores_folded, 1);
        assert_eq!(prog.atoms[atom_id].items[0], Item::Int64(2));
        let entry_block = prog.funcs[fid].entry();
        assert_eq!(prog.funcs[fid].block_arena[entry_block].insts.len(), 1);
    }

    #[test]
    fn store_read_before_overwrite_is_not_killed() {
        let mut prog = Program::new();
        let object = prog.push_object();
        let mut atom = Atom::new("g", Visibility::Local, false, object);
        atom.items.push(Item::Int64(0));
        let atom_id = prog.push_atom(atom);
        let atom_global = prog.declare_global(Global::new("g", Visibility::Local, false, GlobalKind::Atom(atom_id)));

        let mut func = Function::new("f", CallingConv::C);
        let b = func.push_block(Block::new("entry"));
        let mut store1 = Inst::new(InstKind::Store { width: 8 }, SmallVec::new(), b);
        store1.operands = SmallVec::from_vec(vec![ValueRef::Global(atom_global), ValueRef::Const(Constant::Int(1))]);
        func.add_inst(b, store1, None);
        let mut load = Inst::new(InstKind::Load { width: 8 }, SmallVec::from_vec(vec![Type::I64]), b);
        load.operands = SmallVec::from_vec(vec![ValueRef::Global(atom_global)]);
        func.add_inst(b, load, None);
        let mut store2 = Inst::new(InstKind::Store { width: 8 }, SmallVec::new(), b);
        store2.operands = SmallVec::from_vec(vec![ValueRef::Global(atom_global), ValueRef::Const(Constant::Int(2))]);
        func.add_inst(b, store2, None);
        func.add_inst(b, Inst::new(InstKind::Return, SmallVec::new(), b), None);
        let fid = prog.funcs.push(func);
        prog.declare_global(Global::new("f", Visibility::Extern, true, GlobalKind::Function(fid)));

        let stats = run(&mut prog, fid);
        assert_eq!(stats.stores_killed, 0);
        assert_eq!(stats.stores_folded, 1);
        let entry_block = prog.funcs[fid].entry();
        assert_eq!(prog.funcs[fid].block_arena[entry_block].insts.len(), 3);
    }

    #[test]
    fn indirect_call_is_a_full_barrier() {
        let mut prog = Program::new();
        let object = prog.push_object();
        let mut atom = Atom::new("g", Visibility::Local, false, object);
        atom.items.push(Item::Int64(0));
        let atom_id = prog.push_atom(atom);
        let atom_global = prog.declare_global(Global::new("g", Visibility::Local, false, GlobalKind::Atom(atom_id)));

        let mut func = Function::new("f", CallingConv::C);
        let b = func.push_block(Block::new("entry"));
        let mut store = Inst::new(InstKind::Store { width: 8 }, SmallVec::new(), b);
        store.operands = SmallVec::from_vec(vec![ValueRef::Global(atom_global), ValueRef::Const(Constant::Int(1))]);
        func.add_inst(b, store, None);
        let indirect_call = Inst::new(
            InstKind::Call(CallInfo { callee: ValueRef::Const(Constant::Int(0)), args: SmallVec::new(), conv: CallingConv::C }),
            SmallVec::new(),
            b,
        );
        func.add_inst(b, indirect_call, None);
        func.add_inst(b, Inst::new(InstKind::Return, SmallVec::new(), b), None);
        let fid = prog.funcs.push(func);
        prog.declare_global(Global::new("f", Visibility::Extern, true, GlobalKind::Function(fid)));

        let stats = run(&mut prog, fid);
        assert_eq!(stats.stores_folded, 0);
        assert_eq!(stats.stores_killed, 0);
        assert_eq!(prog.atoms[atom_id].items[0], Item::Int64(0));
    }
}
