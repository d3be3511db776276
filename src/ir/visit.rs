//! A light visitor over instruction families (spec §2's "Visitor/Cloner
//! framework"). The source double-dispatches through a class hierarchy; a
//! tagged `InstKind` makes a `match` sufficient, so this is a thin façade
//! that passes can implement instead of writing the `match` themselves —
//! useful once a pass cares about several kinds but not all of them.

use crate::ir::inst::{CallInfo, Inst, InstKind};

pub trait InstVisitor {
    fn visit_memory(&mut self, _inst: &Inst) {}
    fn visit_control(&mut self, _inst: &Inst) {}
    fn visit_call(&mut self, _inst: &Inst, _info: &CallInfo) {}
    fn visit_arith(&mut self, _inst: &Inst) {}
    fn visit_compare(&mut self, _inst: &Inst) {}
    fn visit_move(&mut self, _inst: &Inst) {}
    fn visit_phi(&mut self, _inst: &Inst) {}
    fn visit_other(&mut self, _inst: &Inst) {}
}

pub fn walk(inst: &Inst, visitor: &mut dyn InstVisitor) {
    match &inst.kind {
        InstKind::Load { .. } | InstKind::Store { .. } | InstKind::Xchg { .. } | InstKind::Frame { .. } | InstKind::Alloca => {
            visitor.visit_memory(inst)
        }
        InstKind::Jmp { .. }
        | InstKind::Jcc { .. }
        | InstKind::Switch { .. }
        | InstKind::Return
        | InstKind::Raise
        | InstKind::Trap
        | InstKind::LandingPad => visitor.visit_control(inst),
        InstKind::Call(info) | InstKind::TailCall(info) => visitor.visit_call(inst, info),
        InstKind::Invoke { info, .. } => visitor.visit_call(inst, info),
        InstKind::Add
        | InstKind::Sub
        | InstKind::And
        | InstKind::Or
        | InstKind::Xor
        | InstKind::Mul
        | InstKind::SDiv
        | InstKind::UDiv
        | InstKind::Shl
        | InstKind::Shr
        | InstKind::Select => visitor.visit_arith(inst),
        InstKind::Cmp(_) => visitor.visit_compare(inst),
        InstKind::Mov | InstKind::Arg { .. } => visitor.visit_move(inst),
        InstKind::Phi { .. } => visitor.visit_phi(inst),
        InstKind::Other { .. } => visitor.visit_other(inst),
    }
}
