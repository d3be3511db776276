//! Intra-procedural SSA liveness (spec §4.2), grounded in
//! `original_source/core/analysis/live_variables.cpp`'s lazily-computed,
//! per-block `LiveOut` cache: since SSA values are defined once, `LiveOut`
//! for a block only needs the union of its successors' `LiveIn`s, computed
//! on first query and cached rather than iterated to a fixpoint the way a
//! non-SSA liveness analysis would need to for loop-carried values.

use std::collections::{HashMap, HashSet};

use crate::ir::arena::Id;
use crate::ir::block::{self, Block};
use crate::ir::function::Function;
use crate::ir::inst::InstKind;
use crate::ir::value::ValueRef;

#[derive(Debug, Default)]
pub struct LiveVariables {
    live_out: HashMap<Id<Block>, HashSet<(Id<crate::ir::inst::Inst>, u32)>>,
}

/// The SSA values a single instruction's operand list reads, excluding a
/// φ's operands (those are "read" only along the matching incoming edge,
/// not unconditionally within the block — spec §4.2's φ semantics).
fn non_phi_uses(kind: &InstKind, operands: &[ValueRef]) -> Vec<(Id<crate::ir::inst::Inst>, u32)> {
    if matches!(kind, InstKind::Phi { .. }) {
        return Vec::new();
    }
    operands.iter().filter_map(ValueRef::as_inst).collect()
}

impl LiveVariables {
    /// The SSA values live across the exit of `block`: the union, over each
    /// successor, of that successor's φ operands coming from `block` plus
    /// every non-φ value that successor's `LiveIn` needs.
    pub fn live_out(&mut self, func: &Function, block: Id<Block>) -> HashSet<(Id<crate::ir::inst::Inst>, u32)> {
        if let Some(cached) = self.live_out.get(&block) {
            return cached.clone();
        }
        // Placeholder breaks cycles through loop back-edges: a block
        // re-entered while computing its own LiveOut contributes nothing
        // extra from that path, matching `LiveOut`'s lazy-cache behaviour
        // of treating an in-progress computation as already-settled.
        self.live_out.insert(block, HashSet::new());

        let mut out = HashSet::new();
        for succ in func.successors(block) {
            for phi in block::phis(&func.block_arena[succ], func) {
                if let Some(value) = func.insts[phi].phi_value(block) {
                    if let Some(pair) = value.as_inst() {
                        out.insert(pair);
                    }
                }
            }
            let succ_in = self.live_in(func, succ);
            out.extend(succ_in);
        }

        self.live_out.insert(block, out.clone());
        out
    }

    /// `LiveIn(B) = (LiveOut(B) \ defs(B)) ∪ uses(B)`, not itself cached
    /// since it's cheap to recompute from the cached `LiveOut`.
    pub fn live_in(&mut self, func: &Function, block: Id<Block>) -> HashSet<(Id<crate::ir::inst::Inst>, u32)> {
        let mut live = self.live_out(func, block);
        let mut insts = func.block_arena[block].insts.clone();
        insts.reverse();
        for inst_id in insts {
            let inst = &func.insts[inst_id];
            for r in 0..inst.num_rets() as u32 {
                live.remove(&(inst_id, r));
            }
            for (target, result) in non_phi_uses(&inst.kind, &inst.operands) {
                live.insert((target, result));
            }
        }
        live
    }

    pub fn is_live_out(&mut self, func: &Function, block: Id<Block>, value: (Id<crate::ir::inst::Inst>, u32)) -> bool {
        self.live_out(func, block).contains(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::function::Function;
    use crate::ir::inst::Inst;
    use crate::ir::ty::{CallingConv, Type};
    use smallvec::SmallVec;

    #[test]
    fn value_used_across_a_jump_is_live_out_of_its_defining_block() {
        let mut func = Function::new("f", CallingConv::C);
        let a = func.push_block(Block::new("a"));
        let b = func.push_block(Block::new("b"));

        let def = func.add_inst(a, Inst::new(InstKind::Mov, SmallVec::from_vec(vec![Type::I64]), a), None);
        func.add_inst(a, Inst::new(InstKind::Jmp { target: b }, SmallVec::new(), a), None);

        let mut user = Inst::new(InstKind::Mov, SmallVec::from_vec(vec![Type::I64]), b);
        user.operands = SmallVec::from_vec(vec![ValueRef::Inst(def, 0)]);
        func.add_inst(b, user, None);
        func.add_inst(b, Inst::new(InstKind::Return, SmallVec::new(), b), None);

        let mut live = LiveVariables::default();
        assert!(live.is_live_out(&func, a, (def, 0)));
        assert!(!live.is_live_out(&func, b, (def, 0)));
    }
}
