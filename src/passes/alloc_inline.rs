//! OCaml allocation inliner (spec §4.5): rewrites call sites whose calling
//! convention is `CamlAlloc` and whose callee is `caml_alloc1`/`caml_alloc2`/
//! `caml_alloc3`/`caml_allocN` into an inline young-heap bump-pointer fast
//! path, falling back to a `caml_call_gc` slow path on exhaustion.
//!
//! The CFG shape (split the continuation into a fast and a slow successor,
//! merge their results with two φs, re-key any φs in the old successors)
//! follows the same `split_block`/`phi_rekey` primitives `Function` already
//! exposes for exactly this kind of edit (see their doc comments, which
//! reference this pass directly).

use smallvec::SmallVec;

use crate::ir::annot::Annot;
use crate::ir::arena::Id;
use crate::ir::block::Block;
use crate::ir::function::Function;
use crate::ir::global::{Global, GlobalKind, UserEdge};
use crate::ir::inst::{CallInfo, Inst, InstKind};
use crate::ir::program::Program;
use crate::ir::ty::{CallingConv, CondCode, Type, Visibility};
use crate::ir::value::{Constant, ValueRef};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub sites_inlined: u32,
}

/// Bytes bumped off the young pointer for the sized allocators; `caml_allocN`
/// sizes itself at the call site and gets no subtract (spec §4.5 step 1).
fn alloc_bump(name: &str) -> Option<Option<u32>> {
    match name {
        "caml_alloc1" => Some(Some(16)),
        "caml_alloc2" => Some(Some(24)),
        "caml_alloc3" => Some(Some(32)),
        "caml_allocN" => Some(None),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Call,
    TailCall,
    Invoke { normal: Id<Block>, unwind: Id<Block> },
}

struct Site {
    func: Id<Function>,
    inst: Id<Inst>,
    shape: Shape,
    bump: Option<u32>,
}

fn classify(prog: &Program, func: Id<Function>, inst: Id<Inst>) -> Option<Site> {
    let (kind, types) = {
        let i = &prog.funcs[func].insts[inst];
        (i.kind.clone(), i.types.clone())
    };
    let (info, shape) = match &kind {
        InstKind::Call(info) => (info, Shape::Call),
        InstKind::TailCall(info) => (info, Shape::TailCall),
        InstKind::Invoke { info, normal, unwind } => {
            (info, Shape::Invoke { normal: *normal, unwind: *unwind })
        }
        _ => return None,
    };
    if info.conv != CallingConv::CamlAlloc || info.args.len() < 2 || types.len() < 2 {
        return None;
    }
    let ValueRef::Global(g) = &info.callee else { return None };
    let bump = alloc_bump(&prog.global(*g).name)?;
    Some(Site { func, inst, shape, bump })
}

fn collect_sites(prog: &Program) -> Vec<Site> {
    let mut sites = Vec::new();
    for (func_id, func) in prog.funcs.iter() {
        for (inst_id, _) in func.insts.iter() {
            if let Some(site) = classify(prog, func_id, inst_id) {
                sites.push(site);
            }
        }
    }
    sites
}

/// Appends `inst` to `block`, registering any `Global`/`Expr` operand with
/// the program-level user index, the same bookkeeping the parser does for
/// every instruction it builds (spec §3's Use/User invariant).
fn push(prog: &mut Program, func: Id<Function>, block: Id<Block>, inst: Inst) -> Id<Inst> {
    let operands = inst.operands.clone();
    let id = prog.funcs[func].add_inst(block, inst, None);
    for (index, operand) in operands.iter().enumerate() {
        let edge = UserEdge::Operand { func, inst: id, index: index as u32 };
        match operand {
            ValueRef::Global(g) => prog.add_global_user(*g, edge),
            ValueRef::Expr(e) => prog.add_expr_user(*e, edge),
            _ => {}
        }
    }
    id
}

fn mov_const(prog: &mut Program, func: Id<Function>, block: Id<Block>, value: i128, ty: Type) -> ValueRef {
    let mut inst = Inst::new(InstKind::Mov, SmallVec::from_vec(vec![ty]), block);
    inst.operands.push(ValueRef::Const(Constant::Int(value)));
    ValueRef::Inst(push(prog, func, block, inst), 0)
}

fn binop(
    prog: &mut Program,
    func: Id<Function>,
    block: Id<Block>,
    kind: InstKind,
    a: ValueRef,
    b: ValueRef,
    ty: Type,
) -> ValueRef {
    let mut inst = Inst::new(kind, SmallVec::from_vec(vec![ty]), block);
    inst.operands.push(a);
    inst.operands.push(b);
    ValueRef::Inst(push(prog, func, block, inst), 0)
}

fn rekey_phis(prog: &mut Program, func: Id<Function>, block: Id<Block>, from: Id<Block>, to: Id<Block>) {
    for phi in prog.funcs[func].block_arena[block].insts.clone() {
        if prog.funcs[func].insts[phi].is_phi() {
            prog.funcs[func].insts[phi].phi_rekey(from, to);
        }
    }
}

fn caml_call_gc(prog: &mut Program) -> Id<Global> {
    prog.lookup("caml_call_gc")
        .unwrap_or_else(|| prog.declare_global(Global::new("caml_call_gc", Visibility::Extern, false, GlobalKind::Extern)))
}

/// Rewrites one `CamlAlloc` call site in place, following spec §4.5's five
/// numbered steps.
fn inline_site(prog: &mut Program, site: &Site) {
    let func = site.func;
    let call_inst = site.inst;
    let block = prog.funcs[func].insts[call_inst].block;

    let info = prog.funcs[func].insts[call_inst].kind.call_info().unwrap().clone();
    let result_types = prog.funcs[func].insts[call_inst].types.clone();
    let annots = std::mem::take(&mut prog.funcs[func].insts[call_inst].annots);

    let state_val = info.args[0].clone();
    let young_val = info.args[1].clone();

    let idx = prog.funcs[func].block_arena[block].insts.iter().position(|&i| i == call_inst).unwrap();
    let no_gc = prog.funcs[func].split_block(block, idx + 1);
    let gc_name = format!("{}.gc${}", prog.funcs[func].block_arena[block].name, idx);
    let gc = prog.funcs[func].push_block(Block::new(gc_name));

    // Step 1-2: bump path and limit check, appended to `block` (which, after
    // `split_block`, still ends with `call_inst` — erased below once its
    // uses have been rewired).
    let new_young = match site.bump {
        Some(bytes) => {
            let bytes_val = mov_const(prog, func, block, bytes as i128, Type::I64);
            binop(prog, func, block, InstKind::Sub, young_val.clone(), bytes_val, Type::I64)
        }
        None => young_val.clone(),
    };
    let offset = mov_const(prog, func, block, 8, Type::I64);
    let limit_addr = binop(prog, func, block, InstKind::Add, state_val.clone(), offset, Type::I64);
    let young_limit = {
        let mut inst = Inst::new(InstKind::Load { width: 8 }, SmallVec::from_vec(vec![Type::I64]), block);
        inst.operands.push(limit_addr);
        ValueRef::Inst(push(prog, func, block, inst), 0)
    };
    let flag = binop(prog, func, block, InstKind::Cmp(CondCode::Uge), new_young.clone(), young_limit, Type::I8);

    // Step 3: `B`'s new terminator branches on `flag`, likely to `no_gc`.
    let mut jcc = Inst::new(InstKind::Jcc { then_: no_gc, else_: gc }, SmallVec::new(), block);
    jcc.operands.push(flag);
    jcc.annots.insert(Annot::Probability { num: 1, den: 1 });
    push(prog, func, block, jcc);

    // Step 4: the slow path calls `caml_call_gc` under the `CamlGc`
    // convention, carrying the original call's `AnnotSet` across.
    let gc_callee = caml_call_gc(prog);
    let gc_info = CallInfo {
        callee: ValueRef::Global(gc_callee),
        args: SmallVec::from_vec(vec![state_val.clone(), new_young.clone()]),
        conv: CallingConv::CamlGc,
    };
    let gc_call_id = match site.shape {
        Shape::Invoke { unwind, .. } => {
            let mut inst = Inst::new(InstKind::Invoke { info: gc_info.clone(), normal: no_gc, unwind }, result_types.clone(), gc);
            inst.operands.push(gc_info.callee.clone());
            inst.operands.extend(gc_info.args.iter().cloned());
            inst.annots = annots.clone();
            let id = push(prog, func, gc, inst);
            rekey_phis(prog, func, unwind, block, gc);
            id
        }
        _ => {
            let mut inst = Inst::new(InstKind::Call(gc_info.clone()), result_types.clone(), gc);
            inst.operands.push(gc_info.callee.clone());
            inst.operands.extend(gc_info.args.iter().cloned());
            inst.annots = annots.clone();
            let id = push(prog, func, gc, inst);
            let jmp = Inst::new(InstKind::Jmp { target: no_gc }, SmallVec::new(), gc);
            push(prog, func, gc, jmp);
            id
        }
    };

    // Step 5: merge the two paths' results in `no_gc`, or, for a tail-called
    // allocation, return them directly instead of rewiring uses.
    let phi_state = {
        let incoming = vec![(block, state_val), (gc, ValueRef::Inst(gc_call_id, 0))];
        let inst = Inst::new(InstKind::Phi { incoming }, SmallVec::from_vec(vec![result_types[0]]), no_gc);
        prog.funcs[func].add_phi(no_gc, inst)
    };
    let phi_young = {
        let incoming = vec![(block, new_young), (gc, ValueRef::Inst(gc_call_id, 1))];
        let inst = Inst::new(InstKind::Phi { incoming }, SmallVec::from_vec(vec![result_types[1]]), no_gc);
        prog.funcs[func].add_phi(no_gc, inst)
    };

    match site.shape {
        Shape::TailCall => {
            let mut ret = Inst::new(InstKind::Return, SmallVec::new(), no_gc);
            ret.operands.push(ValueRef::Inst(phi_state, 0));
            ret.operands.push(ValueRef::Inst(phi_young, 0));
            push(prog, func, no_gc, ret);
        }
        Shape::Invoke { normal, .. } => {
            let jmp = Inst::new(InstKind::Jmp { target: normal }, SmallVec::new(), no_gc);
            push(prog, func, no_gc, jmp);
            rekey_phis(prog, func, normal, block, no_gc);
            prog.funcs[func].replace_all_uses_with(call_inst, 0, ValueRef::Inst(phi_state, 0));
            prog.funcs[func].replace_all_uses_with(call_inst, 1, ValueRef::Inst(phi_young, 0));
        }
        Shape::Call => {
            prog.funcs[func].replace_all_uses_with(call_inst, 0, ValueRef::Inst(phi_state, 0));
            prog.funcs[func].replace_all_uses_with(call_inst, 1, ValueRef::Inst(phi_young, 0));
        }
    }

    prog.erase_inst(func, call_inst);
}

pub fn run(prog: &mut Program) -> Stats {
    let sites = collect_sites(prog);
    let mut stats = Stats::default();
    for site in &sites {
        inline_site(prog, site);
        stats.sites_inlined += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ty::Visibility;

    fn alloc_func(prog: &mut Program, callee_name: &str, tail: bool) -> (Id<Function>, Id<Inst>) {
        let mut func = Function::new("alloc_box", CallingConv::Caml);
        let entry = func.push_block(Block::new("entry"));

        let state_arg = Inst::new(InstKind::Arg { index: 0 }, SmallVec::from_vec(vec![Type::I64]), entry);
        let state_id = func.add_inst(entry, state_arg, None);
        let young_arg = Inst::new(InstKind::Arg { index: 1 }, SmallVec::from_vec(vec![Type::I64]), entry);
        let young_id = func.add_inst(entry, young_arg, None);

        let callee = prog.declare_global(Global::new(callee_name, Visibility::Extern, false, GlobalKind::Extern));
        let info = CallInfo {
            callee: ValueRef::Global(callee),
            args: SmallVec::from_vec(vec![ValueRef::Inst(state_id, 0), ValueRef::Inst(young_id, 0)]),
            conv: CallingConv::CamlAlloc,
        };
        let kind = if tail { InstKind::TailCall(info) } else { InstKind::Call(info.clone()) };
        let call = Inst::new(kind, SmallVec::from_vec(vec![Type::I64, Type::I64]), entry);
        let call_id = func.add_inst(entry, call, None);

        if !tail {
            let mut ret = Inst::new(InstKind::Return, SmallVec::new(), entry);
            ret.operands.push(ValueRef::Inst(call_id, 0));
            ret.operands.push(ValueRef::Inst(call_id, 1));
            func.add_inst(entry, ret, None);
        }

        let func_id = prog.funcs.push(func);
        prog.declare_global(Global::new("alloc_box", Visibility::Local, false, GlobalKind::Function(func_id)));
        (func_id, call_id)
    }

    #[test]
    fn inlines_caml_alloc1_with_a_sixteen_byte_bump() {
        let mut prog = Program::new();
        let (func_id, _call_id) = alloc_func(&mut prog, "caml_alloc1", false);
        let stats = run(&mut prog);
        assert_eq!(stats.sites_inlined, 1);

        let entry = prog.funcs[func_id].entry();
        let jcc = prog.funcs[func_id].terminator(entry).expect("entry still terminates");
        assert!(matches!(prog.funcs[func_id].insts[jcc].kind, InstKind::Jcc { .. }));

        let has_sub_16 = prog.funcs[func_id].insts.iter().any(|(_, inst)| {
            matches!(inst.kind, InstKind::Sub)
                && inst.operands.iter().any(|op| matches!(op, ValueRef::Const(Constant::Int(16))))
        });
        assert!(has_sub_16, "expected a `sub young, 16` in the bump path");
    }

    #[test]
    fn caml_alloc_n_inserts_no_bump_subtract() {
        let mut prog = Program::new();
        let (func_id, _) = alloc_func(&mut prog, "caml_allocN", false);
        run(&mut prog);
        let has_any_sub = prog.funcs[func_id].insts.iter().any(|(_, inst)| matches!(inst.kind, InstKind::Sub));
        assert!(!has_any_sub, "caml_allocN must not bump the young pointer");
    }

    #[test]
    fn merges_fast_and_slow_paths_with_two_phis() {
        let mut prog = Program::new();
        let (func_id, call_id) = alloc_func(&mut prog, "caml_alloc2", false);
        run(&mut prog);

        let func = &prog.funcs[func_id];
        assert!(!func.insts.iter().any(|(id, _)| id == call_id), "original call should be erased");

        let phi_count = func.insts.iter().filter(|(_, i)| i.is_phi()).count();
        assert_eq!(phi_count, 2);

        let gc_call = func.insts.iter().find(|(_, i)| matches!(i.kind, InstKind::Call(ref info) if info.conv == CallingConv::CamlGc));
        assert!(gc_call.is_some(), "slow path should call caml_call_gc");
    }

    #[test]
    fn tail_called_allocation_returns_the_merged_values() {
        let mut prog = Program::new();
        let (func_id, _) = alloc_func(&mut prog, "caml_alloc3", true);
        run(&mut prog);

        let func = &prog.funcs[func_id];
        let returns: Vec<_> = func.insts.iter().filter(|(_, i)| matches!(i.kind, InstKind::Return)).collect();
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].1.operands.len(), 2);
    }

    #[test]
    fn invoke_variant_preserves_the_unwind_edge_and_rekeys_its_phis() {
        let mut prog = Program::new();
        let mut func = Function::new("alloc_with_handler", CallingConv::Caml);
        let entry = func.push_block(Block::new("entry"));
        let unwind = func.push_block(Block::new("lpad"));

        let state_arg = Inst::new(InstKind::Arg { index: 0 }, SmallVec::from_vec(vec![Type::I64]), entry);
        let state_id = func.add_inst(entry, state_arg, None);
        let young_arg = Inst::new(InstKind::Arg { index: 1 }, SmallVec::from_vec(vec![Type::I64]), entry);
        let young_id = func.add_inst(entry, young_arg, None);

        let callee = prog.declare_global(Global::new("caml_alloc1", Visibility::Extern, false, GlobalKind::Extern));
        let info = CallInfo {
            callee: ValueRef::Global(callee),
            args: SmallVec::from_vec(vec![ValueRef::Inst(state_id, 0), ValueRef::Inst(young_id, 0)]),
            conv: CallingConv::CamlAlloc,
        };

        // `normal` is created after the invoke so the invoke can name it.
        let normal = func.push_block(Block::new("normal"));
        let invoke = Inst::new(InstKind::Invoke { info, normal, unwind }, SmallVec::from_vec(vec![Type::I64, Type::I64]), entry);
        func.add_inst(entry, invoke, None);

        // A landing-pad φ that (before inlining) merges along the edge from
        // `entry` — this must be re-keyed to the new `gc` block.
        let lpad_phi = Inst::new(
            InstKind::Phi { incoming: vec![(entry, ValueRef::Const(Constant::Int(0)))] },
            SmallVec::from_vec(vec![Type::I64]),
            unwind,
        );
        func.add_phi(unwind, lpad_phi);

        let func_id = prog.funcs.push(func);
        prog.declare_global(Global::new("alloc_with_handler", Visibility::Local, false, GlobalKind::Function(func_id)));

        let stats = run(&mut prog);
        assert_eq!(stats.sites_inlined, 1);

        let func = &prog.funcs[func_id];
        let gc_invoke = func.insts.iter().find(|(_, i)| matches!(i.kind, InstKind::Invoke { ref info, .. } if info.conv == CallingConv::CamlGc));
        let (gc_inst_id, gc_inst) = gc_invoke.expect("gc path should invoke caml_call_gc");
        let gc_block = gc_inst.block;
        assert!(matches!(gc_inst.kind, InstKind::Invoke { unwind: u, .. } if u == unwind));

        let phi = func.insts.iter().find(|(id, _)| *id != gc_inst_id && func.insts[*id].is_phi() && func.insts[*id].block == unwind);
        let (_, phi_inst) = phi.expect("landing-pad phi still present");
        assert_eq!(phi_inst.phi_incoming()[0].0, gc_block);
    }
}
