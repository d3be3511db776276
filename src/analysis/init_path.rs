//! Initialization-order reachability for global constructors (spec §4.3),
//! grounded in `original_source/passes/global_forward/init_path.cpp`.
//!
//! That source tracks "what's known-initialized by the time function F
//! runs" in one field while a different method queries a second field that
//! isn't kept in sync with it across every insertion path — harmless until
//! a ctor with no direct predecessor in priority order is queried, where it
//! silently reads stale (empty) data instead of the accumulated set. This
//! version keeps exactly one field, `initialized_before`, both populated and
//! queried everywhere, so there's nothing for the two copies to disagree on.

use std::collections::HashMap;

use crate::analysis::reference_graph::ReferenceGraph;
use crate::ir::arena::{BitSet, Id};
use crate::ir::data::Object;
use crate::ir::function::Function;
use crate::ir::program::Program;
use crate::ir::xtor::XtorKind;

#[derive(Debug, Default)]
pub struct InitPath {
    /// For each ctor (by priority order) and `main`, the objects guaranteed
    /// to already be fully written by the time that function starts.
    initialized_before: HashMap<Id<Function>, BitSet<Object>>,
}

impl InitPath {
    pub fn initialized_before(&self, func: Id<Function>) -> Option<&BitSet<Object>> {
        self.initialized_before.get(&func)
    }

    pub fn is_initialized_before(&self, func: Id<Function>, object: Id<Object>) -> bool {
        self.initialized_before(func).is_some_and(|set| set.contains(object))
    }
}

pub fn build(prog: &Program, refs: &ReferenceGraph) -> InitPath {
    let mut ctors: Vec<_> = prog.xtors.iter().filter(|x| x.kind == XtorKind::Ctor).collect();
    ctors.sort_by_key(|x| x.priority);

    let mut acc: BitSet<Object> = BitSet::new();
    let mut initialized_before = HashMap::new();

    for xtor in ctors {
        let Some(func_id) = prog.func_by_global(xtor.func) else { continue };
        initialized_before.insert(func_id, acc.clone());
        if let Some(info) = refs.get(func_id) {
            acc.union_with(&info.written_ranges);
            for &obj in info.written_offsets.keys() {
                acc.insert(obj);
            }
        }
    }

    if let Some(main) = prog.main() {
        initialized_before.insert(main, acc.clone());
    }

    InitPath { initialized_before }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::reference_graph;
    use crate::ir::block::Block;
    use crate::ir::data::Atom;
    use crate::ir::function::Function;
    use crate::ir::global::{Global, GlobalKind};
    use crate::ir::inst::{Inst, InstKind};
    use crate::ir::ty::{CallingConv, Visibility};
    use crate::ir::xtor::Xtor;
    use crate::ir::value::{Constant, ValueRef};
    use smallvec::SmallVec;

    #[test]
    fn later_priority_ctor_sees_earlier_ctors_writes() {
        let mut prog = Program::new();
        let object = prog.push_object();
        let atom = prog.push_atom(Atom::new("g", Visibility::Local, false, object));
        let atom_global = prog.declare_global(Global::new("g", Visibility::Local, false, GlobalKind::Atom(atom)));

        let mut ctor_a = Function::new("ctor_a", CallingConv::C);
        let ba = ctor_a.push_block(Block::new("entry"));
        let mut store = Inst::new(InstKind::Store { width: 8 }, SmallVec::new(), ba);
        store.operands = SmallVec::from_vec(vec![ValueRef::Global(atom_global), ValueRef::Const(Constant::Int(1))]);
        ctor_a.add_inst(ba, store, None);
        ctor_a.add_inst(ba, Inst::new(InstKind::Return, SmallVec::new(), ba), None);
        let ctor_a_id = prog.funcs.push(ctor_a);
        let ctor_a_global = prog.declare_global(Global::new("ctor_a", Visibility::Local, false, GlobalKind::Function(ctor_a_id)));

        let mut ctor_b = Function::new("ctor_b", CallingConv::C);
        let bb = ctor_b.push_block(Block::new("entry"));
        ctor_b.add_inst(bb, Inst::new(InstKind::Return, SmallVec::new(), bb), None);
        let ctor_b_id = prog.funcs.push(ctor_b);
        let ctor_b_global = prog.declare_global(Global::new("ctor_b", Visibility::Local, false, GlobalKind::Function(ctor_b_id)));

        prog.xtors.push(Xtor { kind: XtorKind::Ctor, priority: 100, func: ctor_a_global });
        prog.xtors.push(Xtor { kind: XtorKind::Ctor, priority: 200, func: ctor_b_global });

        let refs = reference_graph::build(&prog);
        let init_path = build(&prog, &refs);

        assert!(!init_path.is_initialized_before(ctor_a_id, object));
        assert!(init_path.is_initialized_before(ctor_b_id, object));
    }
}
