//! Functions (spec §3): own a chain of blocks and an arena of instructions.
//! Per-instruction user lists are maintained here (rather than as intrusive
//! pointers) so erasing and `replaceAllUsesWith` stay O(#uses) without
//! `unsafe` (spec §9's "cyclic owner/child references" note).

use std::collections::HashMap;

use crate::ir::arena::{Arena, Id};
use crate::ir::block::{self, Block};
use crate::ir::inst::{Inst, InstKind};
use crate::ir::ty::{CallingConv, Type, Visibility};
use crate::ir::value::ValueRef;

bitflags::bitflags! {
    /// Parameter attributes (spec §3's `(Type, flags)` pairs). A real
    /// bitmask rather than two bools since the source's `Func::Param`
    /// attributes are themselves a bitmask (`core/attr.h`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamFlags: u8 {
        const BYVAL = 1 << 0;
        const SRET = 1 << 1;
    }
}

/// One entry in an instruction's user list: another instruction that reads
/// one of its results through operand slot `operand_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: Id<Inst>,
    pub operand_index: u32,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub visibility: Visibility,
    pub exported: bool,
    pub params: Vec<(Type, ParamFlags)>,
    pub conv: CallingConv,
    pub vararg: bool,

    pub blocks: Vec<Id<Block>>,
    pub block_arena: Arena<Block>,
    pub insts: Arena<Inst>,

    /// `inst sub-result -> users`, the intra-function half of the use-def
    /// graph (the program-level half lives on `Global`/`Expr` users, see
    /// `ir::global::UserEdge`).
    users: HashMap<(Id<Inst>, u32), Vec<Use>>,

    next_order: u32,
    split_counter: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, conv: CallingConv) -> Self {
        Self {
            name: name.into(),
            visibility: Visibility::Local,
            exported: false,
            params: Vec::new(),
            conv,
            vararg: false,
            blocks: Vec::new(),
            block_arena: Arena::new(),
            insts: Arena::new(),
            users: HashMap::new(),
            next_order: 0,
            split_counter: 0,
        }
    }

    pub fn entry(&self) -> Id<Block> {
        *self.blocks.first().expect("function has no blocks")
    }

    pub fn push_block(&mut self, block: Block) -> Id<Block> {
        let id = self.block_arena.push(block);
        self.blocks.push(id);
        id
    }

    /// Appends `inst` to `block`, assigning it the next monotonic order
    /// number and registering its operand edges in every referenced
    /// instruction's user list (spec §3 Use/User invariants).
    pub fn add_inst(&mut self, block: Id<Block>, mut inst: Inst, before: Option<Id<Inst>>) -> Id<Inst> {
        inst.order = self.next_order;
        self.next_order += 1;
        inst.block = block;
        let operands = inst.operands.clone();
        let id = self.insts.push(inst);
        for (idx, operand) in operands.iter().enumerate() {
            self.link_operand(id, idx as u32, operand);
        }
        self.block_arena[block].add_inst(id, before);
        id
    }

    pub fn add_phi(&mut self, block: Id<Block>, mut inst: Inst) -> Id<Inst> {
        inst.order = self.next_order;
        self.next_order += 1;
        inst.block = block;
        if let InstKind::Phi { incoming } = inst.kind.clone() {
            let id = self.insts.push(inst);
            for (i, (_, value)) in incoming.iter().enumerate() {
                self.link_operand(id, i as u32, value);
            }
            self.block_arena[block].add_phi(id);
            return id;
        }
        let id = self.insts.push(inst);
        self.block_arena[block].add_phi(id);
        id
    }

    fn link_operand(&mut self, user: Id<Inst>, operand_index: u32, value: &ValueRef) {
        if let ValueRef::Inst(target, result) = value {
            self.users.entry((*target, *result)).or_default().push(Use { user, operand_index });
        }
    }

    fn unlink_operand(&mut self, user: Id<Inst>, operand_index: u32, value: &ValueRef) {
        if let ValueRef::Inst(target, result) = value {
            if let Some(uses) = self.users.get_mut(&(*target, *result)) {
                uses.retain(|u| !(u.user == user && u.operand_index == operand_index));
            }
        }
    }

    /// Overwrites operand `index` of `user` with `value` and links it into
    /// the new target's user list. Used by the parser to resolve a
    /// forward-referenced vreg once the whole function body has been read;
    /// the placeholder it replaces is always a `Const`, which `link_operand`
    /// never registered, so there is nothing to unlink first.
    pub fn set_operand(&mut self, user: Id<Inst>, index: u32, value: ValueRef) {
        self.insts[user].operands[index as usize] = value.clone();
        if let InstKind::Phi { incoming } = &mut self.insts[user].kind {
            if let Some(slot) = incoming.get_mut(index as usize) {
                slot.1 = value.clone();
            }
        }
        self.link_operand(user, index, &value);
    }

    pub fn users_of(&self, inst: Id<Inst>, result: u32) -> &[Use] {
        self.users.get(&(inst, result)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replaces every use of `(old, result)` with `new`, re-linking user
    /// lists in O(#uses) (spec §3's `replaceAllUsesWith`).
    pub fn replace_all_uses_with(&mut self, old: Id<Inst>, result: u32, new: ValueRef) {
        let uses = self.users.remove(&(old, result)).unwrap_or_default();
        for u in &uses {
            let inst = &mut self.insts[u.user];
            inst.operands[u.operand_index as usize] = new.clone();
            if let InstKind::Phi { incoming } = &mut inst.kind {
                if let Some(slot) = incoming.get_mut(u.operand_index as usize) {
                    slot.1 = new.clone();
                }
            }
        }
        if let ValueRef::Inst(target, new_result) = new {
            self.users.entry((target, new_result)).or_default().extend(uses);
        }
    }

    /// Erases `inst`, first disconnecting it from every user list it
    /// participates in (its operands' user lists) as well as removing it
    /// from its own user-list key (spec §3: "in that order").
    pub fn erase_inst(&mut self, inst: Id<Inst>) {
        let block = self.insts[inst].block;
        let operands = self.insts[inst].operands.clone();
        for (idx, operand) in operands.iter().enumerate() {
            self.unlink_operand(inst, idx as u32, operand);
        }
        let num_rets = self.insts[inst].num_rets() as u32;
        for r in 0..num_rets {
            self.users.remove(&(inst, r));
        }
        self.block_arena[block].remove_inst(inst);
    }

    pub fn terminator(&self, block: Id<Block>) -> Option<Id<Inst>> {
        block::terminator_id(&self.block_arena[block], self)
    }

    pub fn successors(&self, block: Id<Block>) -> Vec<Id<Block>> {
        block::successors(&self.block_arena[block], self)
    }

    pub fn predecessors(&self, target: Id<Block>) -> Vec<Id<Block>> {
        self.blocks.iter().copied().filter(|&b| self.successors(b).contains(&target)).collect()
    }

    /// Splits `block` right before instruction index `at` in its chain,
    /// inserting a fresh successor block and re-pointing φs in its
    /// successors whose incoming block was `block` (mirrors
    /// `Block::splitBlock`; the unique-id counter is per-function per the
    /// spec §9 design note fixing the source's process-global counter).
    pub fn split_block(&mut self, block: Id<Block>, at: usize) -> Id<Block> {
        let name = format!("{}.split${}", self.block_arena[block].name, self.split_counter);
        self.split_counter += 1;
        let tail: Vec<Id<Inst>> = self.block_arena[block].insts.split_off(at);
        let mut cont = Block::new(name);
        for &id in &tail {
            self.insts[id].block = Id::new(0); // reassigned below once cont has an id
            cont.insts.push(id);
        }
        let idx = self.blocks.iter().position(|&b| b == block).expect("block in function");
        let cont_id = self.block_arena.push(cont);
        self.blocks.insert(idx + 1, cont_id);
        for &id in &tail {
            self.insts[id].block = cont_id;
        }
        for succ in self.successors(cont_id) {
            for &phi in self.block_arena[succ].insts.clone().iter() {
                if self.insts[phi].is_phi() {
                    self.insts[phi].phi_rekey(block, cont_id);
                }
            }
        }
        cont_id
    }
}
