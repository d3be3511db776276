//! Basic blocks (spec §3, §4.2), grounded in `original_source/core/block.cpp`.

use crate::ir::arena::Id;
use crate::ir::function::Function;
use crate::ir::inst::{Inst, InstKind};
use crate::ir::ty::Visibility;

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub visibility: Visibility,
    pub exported: bool,
    /// Insertion-ordered chain of this block's instructions; φs occupy a
    /// contiguous prefix.
    pub insts: Vec<Id<Inst>>,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), visibility: Visibility::Local, exported: false, insts: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Pushes `inst` at the end, or before `before` if given (mirrors
    /// `Block::AddInst`).
    pub fn add_inst(&mut self, inst: Id<Inst>, before: Option<Id<Inst>>) {
        match before {
            None => self.insts.push(inst),
            Some(pos) => {
                let idx = self.insts.iter().position(|&i| i == pos).expect("before not in block");
                self.insts.insert(idx, inst);
            }
        }
    }

    /// Pushes a φ at the front, preserving the "φs are a contiguous prefix"
    /// invariant (mirrors `Block::AddPhi`).
    pub fn add_phi(&mut self, inst: Id<Inst>) {
        self.insts.insert(0, inst);
    }

    pub fn remove_inst(&mut self, inst: Id<Inst>) {
        self.insts.retain(|&i| i != inst);
    }
}

/// Returns the block's last instruction if it is a terminator (mirrors
/// `Block::GetTerminator`); `Function` owns the `Inst` arena so this needs
/// the function to resolve ids.
pub fn terminator<'a>(block: &Block, func: &'a Function) -> Option<&'a Inst> {
    let &last = block.insts.last()?;
    let inst = &func.insts[last];
    inst.kind.is_terminator().then_some(inst)
}

pub fn terminator_id(block: &Block, func: &Function) -> Option<Id<Inst>> {
    let &last = block.insts.last()?;
    func.insts[last].kind.is_terminator().then_some(last)
}

pub fn successors(block: &Block, func: &Function) -> Vec<Id<Block>> {
    terminator(block, func).map(|t| t.kind.successors().into_vec()).unwrap_or_default()
}

pub fn phis<'a>(block: &'a Block, func: &'a Function) -> impl Iterator<Item = Id<Inst>> + 'a {
    block.insts.iter().copied().take_while(move |&id| func.insts[id].is_phi())
}

pub fn body<'a>(block: &'a Block, func: &'a Function) -> impl Iterator<Item = Id<Inst>> + 'a {
    block.insts.iter().copied().skip_while(move |&id| func.insts[id].is_phi())
}

/// A block's address is taken iff some user of it is not a plain control
/// transfer (Jmp/Jcc/Switch), mirroring `Block::HasAddressTaken`.
pub fn has_address_taken(users: &[InstKind]) -> bool {
    users.iter().any(|kind| !matches!(kind, InstKind::Jmp { .. } | InstKind::Jcc { .. } | InstKind::Switch { .. }))
}
