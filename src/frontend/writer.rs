//! Textual emitter, the mirror of the parser so `emit(parse(text))` round
//! trips modulo synthetic-label renumbering (spec §8).

use std::fmt::Write as _;

use crate::ir::annot::Annot;
use crate::ir::arena::Id;
use crate::ir::block::Block;
use crate::ir::data::Item;
use crate::ir::function::Function;
use crate::ir::global::GlobalKind;
use crate::ir::inst::{CallInfo, Inst, InstKind};
use crate::ir::program::Program;
use crate::ir::ty::{CallingConv, Type, Visibility};
use crate::ir::value::{Constant, ValueRef};
use crate::ir::xtor::XtorKind;

pub fn emit_program(prog: &Program) -> String {
    let mut out = String::new();
    for (_, global) in prog.globals() {
        if let GlobalKind::Function(func_id) = global.kind {
            emit_function(prog, func_id, &mut out);
        }
    }
    for section in &prog.data {
        emit_data_section(prog, section, &mut out);
    }
    for xtor in &prog.xtors {
        let kind = match xtor.kind {
            XtorKind::Ctor => "ctor",
            XtorKind::Dtor => "dtor",
        };
        let _ = writeln!(out, ".xtor {} {} {}", kind, xtor.priority, prog.global(xtor.func).name);
    }
    out
}

fn visibility_suffix(visibility: Visibility, exported: bool) -> String {
    let mut s = String::new();
    match visibility {
        Visibility::Local => {}
        Visibility::Hidden => s.push_str(".hidden"),
        Visibility::Extern => s.push_str(".extern"),
    }
    if exported {
        s.push_str(".export");
    }
    s
}

fn emit_function(prog: &Program, func_id: Id<Function>, out: &mut String) {
    let func = &prog.funcs[func_id];
    let _ = write!(out, ".func {}{}", func.name, visibility_suffix(func.visibility, func.exported));
    if func.conv != CallingConv::C {
        let _ = write!(out, ".{}", func.conv);
    }
    if func.vararg {
        let _ = write!(out, ".vararg");
    }
    if !func.params.is_empty() {
        let _ = write!(out, "(");
        for (i, (ty, flags)) in func.params.iter().enumerate() {
            if i > 0 {
                let _ = write!(out, ", ");
            }
            let _ = write!(out, "{}", ty);
            if flags.contains(crate::ir::function::ParamFlags::BYVAL) {
                let _ = write!(out, " byval");
            }
            if flags.contains(crate::ir::function::ParamFlags::SRET) {
                let _ = write!(out, " sret");
            }
        }
        let _ = write!(out, ")");
    }
    let _ = writeln!(out);
    for &block_id in &func.blocks {
        let block = &func.block_arena[block_id];
        let _ = writeln!(out, "{}:", block.name);
        for &inst_id in &block.insts {
            emit_inst(prog, func, inst_id, out);
        }
    }
}

fn emit_operand(prog: &Program, operand: &ValueRef, out: &mut String) {
    match operand {
        ValueRef::Inst(id, idx) => {
            let _ = write!(out, "${}.{}", id.index(), idx);
        }
        ValueRef::Global(id) => {
            let _ = write!(out, "{}", prog.global(*id).name);
        }
        ValueRef::Expr(id) => {
            let expr = prog.expr(*id);
            let sym = &prog.global(expr.symbol()).name;
            if expr.offset() >= 0 {
                let _ = write!(out, "{}+{}", sym, expr.offset());
            } else {
                let _ = write!(out, "{}-{}", sym, -expr.offset());
            }
        }
        ValueRef::Const(Constant::Int(v)) => {
            let _ = write!(out, "{}", v);
        }
        ValueRef::Const(Constant::Float(v)) => {
            let _ = write!(out, "{}", v);
        }
        ValueRef::Const(Constant::Reg(r)) => {
            let _ = write!(out, "${:?}", r);
        }
    }
}

fn emit_types(types: &[Type], out: &mut String) {
    for ty in types {
        let _ = write!(out, ".{}", ty);
    }
}

fn emit_call_info(prog: &Program, info: &CallInfo, out: &mut String) {
    if info.conv != CallingConv::C {
        let _ = write!(out, ".{}", info.conv);
    }
    let _ = write!(out, " ");
    emit_operand(prog, &info.callee, out);
    for arg in &info.args {
        let _ = write!(out, ", ");
        emit_operand(prog, arg, out);
    }
}

fn emit_block_ref(func: &Function, block: Id<Block>, out: &mut String) {
    let _ = write!(out, "{}", func.block_arena[block].name);
}

fn emit_annot(annot: &Annot, out: &mut String) {
    match annot {
        Annot::Probability { num, den } => {
            let _ = write!(out, " @probability({} {})", num, den);
        }
        Annot::CamlFrame { allocs, infos } => {
            let _ = write!(out, " @caml_frame((");
            for (i, a) in allocs.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, " ");
                }
                let _ = write!(out, "{}", a);
            }
            let _ = write!(out, ") (");
            for (i, row) in infos.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, " ");
                }
                let _ = write!(out, "(");
                for (j, v) in row.iter().enumerate() {
                    if j > 0 {
                        let _ = write!(out, " ");
                    }
                    let _ = write!(out, "{}", v);
                }
                let _ = write!(out, ")");
            }
            let _ = write!(out, "))");
        }
        Annot::CxxLsda { cleanup, catch_all, catch_types, filter_types } => {
            let _ = write!(out, " @cxx_lsda({} {} (", *cleanup as u8, *catch_all as u8);
            for (i, s) in catch_types.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, " ");
                }
                let _ = write!(out, "{:?}", s);
            }
            let _ = write!(out, ") (");
            for (i, s) in filter_types.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, " ");
                }
                let _ = write!(out, "{:?}", s);
            }
            let _ = write!(out, "))");
        }
    }
}

fn emit_inst(prog: &Program, func: &Function, inst_id: Id<Inst>, out: &mut String) {
    let inst = &func.insts[inst_id];
    let ops = &inst.operands;
    let _ = write!(out, "  ");
    match &inst.kind {
        InstKind::Arg { index } => {
            let _ = write!(out, "arg.{}", index);
            emit_types(&inst.types, out);
        }
        InstKind::Mov => {
            let _ = write!(out, "mov");
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            emit_operand(prog, &ops[0], out);
        }
        InstKind::Load { width } => {
            let _ = write!(out, "load.{}", width);
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            emit_operand(prog, &ops[0], out);
        }
        InstKind::Store { width } => {
            let _ = write!(out, "store.{} ", width);
            emit_operand(prog, &ops[0], out);
            let _ = write!(out, ", ");
            emit_operand(prog, &ops[1], out);
        }
        InstKind::Xchg { width } => {
            let _ = write!(out, "xchg.{}", width);
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            emit_operand(prog, &ops[0], out);
            let _ = write!(out, ", ");
            emit_operand(prog, &ops[1], out);
        }
        InstKind::Frame { object } => {
            let _ = write!(out, "frame.{}", object);
            emit_types(&inst.types, out);
        }
        InstKind::Alloca => {
            let _ = write!(out, "alloca");
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            emit_operand(prog, &ops[0], out);
        }
        InstKind::Select => {
            let _ = write!(out, "select");
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, ", ");
                }
                emit_operand(prog, op, out);
            }
        }
        InstKind::Add | InstKind::Sub | InstKind::And | InstKind::Or | InstKind::Xor | InstKind::Mul | InstKind::SDiv | InstKind::UDiv
        | InstKind::Shl | InstKind::Shr => {
            let mnemonic = match &inst.kind {
                InstKind::Add => "add",
                InstKind::Sub => "sub",
                InstKind::And => "and",
                InstKind::Or => "or",
                InstKind::Xor => "xor",
                InstKind::Mul => "mul",
                InstKind::SDiv => "sdiv",
                InstKind::UDiv => "udiv",
                InstKind::Shl => "shl",
                InstKind::Shr => "shr",
                _ => unreachable!(),
            };
            let _ = write!(out, "{}", mnemonic);
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            emit_operand(prog, &ops[0], out);
            let _ = write!(out, ", ");
            emit_operand(prog, &ops[1], out);
        }
        InstKind::Cmp(cc) => {
            let _ = write!(out, "cmp.{}", cc);
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            emit_operand(prog, &ops[0], out);
            let _ = write!(out, ", ");
            emit_operand(prog, &ops[1], out);
        }
        InstKind::Phi { incoming } => {
            let _ = write!(out, "phi");
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            for (i, (block, value)) in incoming.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, ", ");
                }
                emit_block_ref(func, *block, out);
                let _ = write!(out, ", ");
                emit_operand(prog, value, out);
            }
        }
        InstKind::Call(info) => {
            let _ = write!(out, "call");
            emit_types(&inst.types, out);
            emit_call_info(prog, info, out);
        }
        InstKind::TailCall(info) => {
            let _ = write!(out, "tailcall");
            emit_types(&inst.types, out);
            emit_call_info(prog, info, out);
        }
        InstKind::Invoke { info, normal, unwind } => {
            let _ = write!(out, "invoke");
            emit_types(&inst.types, out);
            emit_call_info(prog, info, out);
            let _ = write!(out, ", ");
            emit_block_ref(func, *normal, out);
            let _ = write!(out, ", ");
            emit_block_ref(func, *unwind, out);
        }
        InstKind::Jmp { target } => {
            let _ = write!(out, "jmp ");
            emit_block_ref(func, *target, out);
        }
        InstKind::Jcc { then_, else_ } => {
            let _ = write!(out, "jcc ");
            emit_operand(prog, &ops[0], out);
            let _ = write!(out, ", ");
            emit_block_ref(func, *then_, out);
            let _ = write!(out, ", ");
            emit_block_ref(func, *else_, out);
        }
        InstKind::Switch { targets } => {
            let _ = write!(out, "switch ");
            emit_operand(prog, &ops[0], out);
            for target in targets {
                let _ = write!(out, ", ");
                emit_block_ref(func, *target, out);
            }
        }
        InstKind::Return => {
            let _ = write!(out, "ret");
            for (i, op) in ops.iter().enumerate() {
                if i == 0 {
                    let _ = write!(out, " ");
                } else {
                    let _ = write!(out, ", ");
                }
                emit_operand(prog, op, out);
            }
        }
        InstKind::Raise => {
            let _ = write!(out, "raise ");
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, ", ");
                }
                emit_operand(prog, op, out);
            }
        }
        InstKind::Trap => {
            let _ = write!(out, "trap");
        }
        InstKind::LandingPad => {
            let _ = write!(out, "landing_pad");
            emit_types(&inst.types, out);
        }
        InstKind::Other { mnemonic } => {
            let _ = write!(out, "{}", mnemonic);
            emit_types(&inst.types, out);
            let _ = write!(out, " ");
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, ", ");
                }
                emit_operand(prog, op, out);
            }
        }
    }
    for annot in inst.annots.iter() {
        emit_annot(annot, out);
    }
    let _ = writeln!(out);
}

fn emit_data_section(prog: &Program, section: &crate::ir::data::DataSection, out: &mut String) {
    let _ = writeln!(out, ".data {}", section.name);
    for &object_id in &section.objects {
        let _ = writeln!(out, ".object");
        let object = &prog.objects[object_id];
        for &atom_id in &object.atoms {
            let atom = &prog.atoms[atom_id];
            let _ = writeln!(out, "{}{}:", atom.name, visibility_suffix(atom.visibility, atom.exported));
            if atom.align != 1 {
                let _ = writeln!(out, "  .align {}", atom.align);
            }
            for item in &atom.items {
                emit_item(prog, item, out);
            }
        }
    }
}

fn emit_item(prog: &Program, item: &Item, out: &mut String) {
    match item {
        Item::Int8(v) => {
            let _ = writeln!(out, "  .i8 {}", v);
        }
        Item::Int16(v) => {
            let _ = writeln!(out, "  .i16 {}", v);
        }
        Item::Int32(v) => {
            let _ = writeln!(out, "  .i32 {}", v);
        }
        Item::Int64(v) => {
            let _ = writeln!(out, "  .i64 {}", v);
        }
        Item::Float64(v) => {
            let _ = writeln!(out, "  .f64 {}", v.to_bits());
        }
        Item::Space(n) => {
            let _ = writeln!(out, "  .space {}", n);
        }
        Item::String(s) => {
            let _ = writeln!(out, "  .string {:?}", s);
        }
        Item::Expr(id) => {
            let expr = prog.expr(*id);
            let sym = &prog.global(expr.symbol()).name;
            if expr.offset() >= 0 {
                let _ = writeln!(out, "  .quad {}+{}", sym, expr.offset());
            } else {
                let _ = writeln!(out, "  .quad {}-{}", sym, -expr.offset());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse;

    #[test]
    fn round_trips_simple_function() {
        let src = ".func f\n  ret\n";
        let prog = parse(src).unwrap();
        let out = emit_program(&prog);
        assert!(out.contains(".func f"));
        assert!(out.contains("ret"));
    }

    #[test]
    fn round_trips_data_section() {
        let src = ".data const\n.object\na:\n.i32 5\n";
        let prog = parse(src).unwrap();
        let out = emit_program(&prog);
        let prog2 = parse(&out).unwrap();
        assert_eq!(prog2.data.len(), 1);
        let object = &prog2.objects[prog2.data[0].objects[0]];
        assert_eq!(prog2.atoms[object.atoms[0]].items.len(), 1);
    }

    #[test]
    fn round_trips_jmp_with_annotation() {
        let src = ".func f\n  jmp a @probability(1 2)\na:\n  ret\n";
        let prog = parse(src).unwrap();
        let out = emit_program(&prog);
        assert!(out.contains("@probability(1 2)"));
    }
}