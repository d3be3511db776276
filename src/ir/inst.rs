//! Instructions (spec §3, §9). The source models ~150 concrete kinds via
//! inheritance; here a single tagged `InstKind` enum replaces the hierarchy,
//! grouped into the families spec §3 names (memory, control, call-site,
//! arithmetic, compare, move, phi, frame, landing-pad). Kinds outside the
//! core's analyses/transforms (target-specific intrinsics) are represented
//! by the catch-all `Kind::Other` variant carrying just a mnemonic, since
//! they are inert with respect to every pass in this crate.

use smallvec::SmallVec;

use crate::ir::annot::AnnotSet;
use crate::ir::arena::Id;
use crate::ir::block::Block;
use crate::ir::ty::{CallingConv, CondCode, Type};
use crate::ir::value::ValueRef;

pub type Operand = ValueRef;

#[derive(Debug, Clone, PartialEq)]
pub struct CallInfo {
    pub callee: Operand,
    pub args: SmallVec<[Operand; 4]>,
    pub conv: CallingConv,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Arg { index: u32 },
    Mov,
    Load { width: u32 },
    Store { width: u32 },
    Xchg { width: u32 },
    Frame { object: u32 },
    Alloca,
    Select,

    Add,
    Sub,
    And,
    Or,
    Xor,
    Mul,
    SDiv,
    UDiv,
    Shl,
    Shr,

    Cmp(CondCode),
    /// Incoming `(predecessor block, value)` pairs, order-independent (spec
    /// §8: "every φ's incoming block list equals, as a set, its parent
    /// block's predecessor set").
    Phi { incoming: Vec<(Id<Block>, Operand)> },

    Call(CallInfo),
    TailCall(CallInfo),
    Invoke { info: CallInfo, normal: Id<Block>, unwind: Id<Block> },

    Jmp { target: Id<Block> },
    Jcc { then_: Id<Block>, else_: Id<Block> },
    Switch { targets: Vec<Id<Block>> },
    Return,
    Raise,
    Trap,
    LandingPad,

    /// A target-specific or leaf-pass-only opcode this crate's core passes
    /// never rewrite; carried verbatim through parsing and emission.
    Other { mnemonic: String },
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Jmp { .. }
                | InstKind::Jcc { .. }
                | InstKind::Switch { .. }
                | InstKind::Return
                | InstKind::Raise
                | InstKind::Trap
                | InstKind::TailCall(_)
                | InstKind::Invoke { .. }
        )
    }

    pub fn is_call_site(&self) -> bool {
        matches!(self, InstKind::Call(_) | InstKind::TailCall(_) | InstKind::Invoke { .. })
    }

    pub fn call_info(&self) -> Option<&CallInfo> {
        match self {
            InstKind::Call(info) | InstKind::TailCall(info) | InstKind::Invoke { info, .. } => Some(info),
            _ => None,
        }
    }

    pub fn call_info_mut(&mut self) -> Option<&mut CallInfo> {
        match self {
            InstKind::Call(info) | InstKind::TailCall(info) | InstKind::Invoke { info, .. } => Some(info),
            _ => None,
        }
    }

    /// Ordered list of successor blocks for a terminator, empty otherwise
    /// (spec §4.2: terminators "expose a finite, ordered list of successor
    /// blocks").
    pub fn successors(&self) -> SmallVec<[Id<Block>; 2]> {
        match self {
            InstKind::Jmp { target } => SmallVec::from_slice(&[*target]),
            InstKind::Jcc { then_, else_ } => SmallVec::from_slice(&[*then_, *else_]),
            InstKind::Switch { targets } => targets.iter().copied().collect(),
            InstKind::Invoke { normal, unwind, .. } => SmallVec::from_slice(&[*normal, *unwind]),
            _ => SmallVec::new(),
        }
    }
}

/// A single instruction. Owned by a [`Block`] via its `Function`'s
/// instruction arena; the `block` field lets an instruction answer
/// `GetParent()` without a back-pointer table.
#[derive(Debug, Clone)]
pub struct Inst {
    pub kind: InstKind,
    pub types: SmallVec<[Type; 1]>,
    pub operands: SmallVec<[Operand; 4]>,
    pub annots: AnnotSet,
    pub order: u32,
    pub block: Id<Block>,
}

impl Inst {
    pub fn new(kind: InstKind, types: impl Into<SmallVec<[Type; 1]>>, block: Id<Block>) -> Self {
        Self { kind, types: types.into(), operands: SmallVec::new(), annots: AnnotSet::new(), order: 0, block }
    }

    pub fn num_rets(&self) -> usize {
        self.types.len()
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi { .. })
    }

    pub fn phi_incoming(&self) -> &[(Id<Block>, Operand)] {
        match &self.kind {
            InstKind::Phi { incoming } => incoming,
            _ => &[],
        }
    }

    pub fn phi_incoming_mut(&mut self) -> &mut Vec<(Id<Block>, Operand)> {
        match &mut self.kind {
            InstKind::Phi { incoming } => incoming,
            _ => panic!("phi_incoming_mut called on a non-phi instruction"),
        }
    }

    pub fn phi_value(&self, block: Id<Block>) -> Option<&Operand> {
        self.phi_incoming().iter().find(|(b, _)| *b == block).map(|(_, v)| v)
    }

    /// Rewrites every incoming edge from `from` to `to`, used when splitting
    /// a block or inlining the allocation fast path (spec §4.5 step 4: "any
    /// φs in the throw block from `B` to `gc`").
    pub fn phi_rekey(&mut self, from: Id<Block>, to: Id<Block>) {
        for (block, _) in self.phi_incoming_mut().iter_mut() {
            if *block == from {
                *block = to;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_classification_matches_families() {
        let jmp = InstKind::Jmp { target: Id::new(0) };
        assert!(jmp.is_terminator());
        assert!(!InstKind::Mov.is_terminator());
        assert!(InstKind::Invoke {
            info: CallInfo { callee: Operand::Const(crate::ir::value::Constant::Int(0)), args: SmallVec::new(), conv: CallingConv::C },
            normal: Id::new(1),
            unwind: Id::new(2),
        }
        .is_terminator());
    }
}
