//! Recursive-descent parser (spec §4.1): decomposes opcodes, resolves
//! forward-referenced virtual registers at function close, and materializes
//! blocks (synthesizing labels where the source omits them).

use std::collections::HashMap;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::common::error::{FatalError, ParseError};
use crate::common::source::{Pos, Qualifier};
use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::ir::annot::{self, Annot};
use crate::ir::arena::Id;
use crate::ir::block::Block;
use crate::ir::data::{Atom, Item};
use crate::ir::expr::Expr;
use crate::ir::function::{Function, ParamFlags};
use crate::ir::global::{Global, GlobalKind};
use crate::ir::inst::{CallInfo, Inst, InstKind};
use crate::ir::program::Program;
use crate::ir::sexp;
use crate::ir::ty::{CallingConv, CondCode, Type, Visibility};
use crate::ir::value::{Constant, ValueRef};
use crate::ir::xtor::{Xtor, XtorKind};

const COND_CODES: &[(&str, CondCode)] = &[
    ("eq", CondCode::Eq),
    ("ne", CondCode::Ne),
    ("lt", CondCode::Lt),
    ("le", CondCode::Le),
    ("gt", CondCode::Gt),
    ("ge", CondCode::Ge),
    ("oeq", CondCode::Oeq),
    ("one", CondCode::One),
    ("olt", CondCode::Olt),
    ("ogt", CondCode::Ogt),
    ("ole", CondCode::Ole),
    ("oge", CondCode::Oge),
    ("o", CondCode::O),
    ("ueq", CondCode::Ueq),
    ("une", CondCode::Une),
    ("ult", CondCode::Ult),
    ("ugt", CondCode::Ugt),
    ("ule", CondCode::Ule),
    ("uge", CondCode::Uge),
    ("uo", CondCode::Uo),
];

fn lookup_type(s: &str) -> Option<Type> {
    Some(match s {
        "i8" => Type::I8,
        "i16" => Type::I16,
        "i32" => Type::I32,
        "i64" => Type::I64,
        "i128" => Type::I128,
        "f32" => Type::F32,
        "f64" => Type::F64,
        "f80" => Type::F80,
        "f128" => Type::F128,
        "v64" => Type::V64,
        _ => return None,
    })
}

fn lookup_conv(s: &str) -> Option<CallingConv> {
    Some(match s {
        "c" => CallingConv::C,
        "fast" => CallingConv::Fast,
        "caml" => CallingConv::Caml,
        "caml_alloc" => CallingConv::CamlAlloc,
        "caml_gc" => CallingConv::CamlGc,
        "caml_raise" => CallingConv::CamlRaise,
        _ => return None,
    })
}

/// A decomposed opcode: base mnemonic plus the classified modifier tokens
/// (spec §4.1: cond code / type suffixes / calling convention / size
/// suffix / `strict`).
#[derive(Debug, Default)]
struct Opcode {
    mnemonic: String,
    cond: Option<CondCode>,
    types: Vec<Type>,
    conv: Option<CallingConv>,
    size: Option<u32>,
    strict: bool,
}

fn decompose_opcode(raw: &str) -> Result<Opcode, ParseError> {
    let mut parts = raw.split('.');
    let mnemonic = parts.next().ok_or(ParseError::InvalidSExp)?.to_string();
    let mut op = Opcode { mnemonic, ..Opcode::default() };
    for part in parts {
        if part == "strict" {
            op.strict = true;
        } else if let Some(cc) = COND_CODES.iter().find(|(name, _)| *name == part) {
            op.cond = Some(cc.1);
        } else if let Some(ty) = lookup_type(part) {
            op.types.push(ty);
        } else if let Some(conv) = lookup_conv(part) {
            op.conv = Some(conv);
        } else if let Ok(n) = part.parse::<u32>() {
            op.size = Some(n);
        } else {
            return Err(ParseError::UnknownOpcode(raw.to_string()));
        }
    }
    Ok(op)
}

/// A decomposed `.func` header: the bare name plus whatever visibility /
/// calling-convention / vararg modifiers were dot-suffixed onto it, the
/// same decomposition style as an instruction opcode (spec §4.1's
/// dot-modifier grammar, extended by this parser to the function header
/// since the spec leaves that line's exact textual grammar unspecified).
#[derive(Debug, Default)]
struct FuncHeader {
    name: String,
    visibility: Option<Visibility>,
    exported: bool,
    conv: Option<CallingConv>,
    vararg: bool,
}

fn decompose_func_header(raw: &str) -> Result<FuncHeader, ParseError> {
    let mut parts = raw.split('.');
    let name = parts.next().ok_or(ParseError::InvalidSExp)?.to_string();
    let mut header = FuncHeader { name, ..FuncHeader::default() };
    for part in parts {
        match part {
            "local" => header.visibility = Some(Visibility::Local),
            "hidden" => header.visibility = Some(Visibility::Hidden),
            "extern" => header.visibility = Some(Visibility::Extern),
            "export" => header.exported = true,
            "vararg" => header.vararg = true,
            other => {
                if let Some(conv) = lookup_conv(other) {
                    header.conv = Some(conv);
                } else {
                    return Err(ParseError::UnknownOpcode(raw.to_string()));
                }
            }
        }
    }
    Ok(header)
}

#[derive(Debug, Clone)]
enum RawOperand {
    VReg(u64),
    Ident(String),
    Int(i128),
    Reg(crate::ir::value::Reg),
}

/// Resolves one already-classified operand token against the function's
/// vreg table (queuing forward references) and the program's global table
/// (declaring an `Extern` stand-in the first time a callee/address symbol
/// is seen — the linker phase, out of core scope, is where such a stand-in
/// would later be resolved against a real definition or rejected).
fn resolve_operand(
    prog: &mut Program,
    fb: &mut FuncBuilder,
    placeholders: &mut Vec<(u32, u64)>,
    idx: u32,
    raw: &RawOperand,
) -> ValueRef {
    match raw {
        RawOperand::VReg(n) => {
            if let Some(&(inst, res)) = fb.vregs.get(n) {
                ValueRef::Inst(inst, res)
            } else {
                placeholders.push((idx, *n));
                ValueRef::Const(Constant::Int(0))
            }
        }
        RawOperand::Int(n) => ValueRef::Const(Constant::Int(*n)),
        RawOperand::Reg(r) => ValueRef::Const(Constant::Reg(r.clone())),
        RawOperand::Ident(name) => {
            let id = match prog.lookup(name) {
                Some(id) => id,
                None => prog.declare_global(Global::new(name.clone(), Visibility::Extern, false, GlobalKind::Extern)),
            };
            ValueRef::Global(id)
        }
    }
}

struct FuncBuilder {
    func: Function,
    /// This function's own id in `prog.funcs`, reserved before its body is
    /// parsed (see `parse_func`); needed here so `build_inst` can register
    /// `Global`/`Expr` operands as users at the program level.
    program_func_id: Id<Function>,
    /// vreg number -> (defining inst, result index), populated as
    /// destinations are seen; forward references are resolved once the
    /// whole function has been read.
    vregs: HashMap<u64, (Id<Inst>, u32)>,
    /// name -> block id, populated as labels are encountered (lazily
    /// creating a block the first time it's referenced as a jump target).
    blocks: IndexMap<String, Id<Block>>,
    synthetic_counter: u32,
    /// (inst, operand index, vreg) pending resolution against `vregs`.
    pending: Vec<(Id<Inst>, u32, u64, Pos)>,
}

impl FuncBuilder {
    fn new(name: &str, conv: CallingConv, program_func_id: Id<Function>) -> Self {
        Self {
            func: Function::new(name, conv),
            program_func_id,
            vregs: HashMap::new(),
            blocks: IndexMap::new(),
            synthetic_counter: 0,
            pending: Vec::new(),
        }
    }

    fn block(&mut self, name: &str) -> Id<Block> {
        if let Some(&id) = self.blocks.get(name) {
            return id;
        }
        let id = self.func.push_block(Block::new(name));
        self.blocks.insert(name.to_string(), id);
        id
    }

    fn synthetic_block(&mut self, terminal: bool) -> Id<Block> {
        let name = if terminal {
            format!(".LBBterm${}", self.synthetic_counter)
        } else {
            format!(".LBBentry${}", self.synthetic_counter)
        };
        self.synthetic_counter += 1;
        self.block(&name)
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    tok: Token,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Result<Self, FatalError> {
        let mut lexer = Lexer::new(src);
        let tok = lexer.next().map_err(|e| FatalError { pos: Pos::start(), qualifier: Qualifier::none(), kind: e.into() })?;
        Ok(Self { lexer, tok })
    }

    fn pos(&self) -> Pos {
        Pos { row: self.tok.row, col: self.tok.col }
    }

    fn bump(&mut self) -> Result<Token, ParseError> {
        let next = self.lexer.next()?;
        Ok(std::mem::replace(&mut self.tok, next))
    }

    fn fatal(&self, kind: ParseError, q: &Qualifier) -> FatalError {
        FatalError { pos: self.pos(), qualifier: q.clone(), kind }
    }

    /// Parses a whole program: a flat sequence of `.func NAME` / `.data NAME`
    /// directives each followed by label/instruction lines until the next
    /// directive or end of input.
    pub fn parse_program(mut self) -> Result<Program, FatalError> {
        let mut prog = Program::new();
        while self.tok.kind != TokenKind::End {
            self.skip_blank().map_err(|e| self.fatal(e, &Qualifier::none()))?;
            if self.tok.kind == TokenKind::End {
                break;
            }
            match &self.tok.kind {
                TokenKind::Ident(s) if s == ".func" => self.parse_func(&mut prog)?,
                TokenKind::Ident(s) if s == ".data" => self.parse_data(&mut prog)?,
                TokenKind::Ident(s) if s == ".xtor" => self.parse_xtor(&mut prog)?,
                _ => {
                    return Err(self.fatal(
                        ParseError::UnexpectedToken { expected: ".func, .data or .xtor".into(), found: format!("{:?}", self.tok.kind) },
                        &Qualifier::none(),
                    ))
                }
            }
        }
        Ok(prog)
    }

    fn skip_blank(&mut self) -> Result<(), ParseError> {
        while self.tok.kind == TokenKind::Newline {
            self.bump()?;
        }
        Ok(())
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.tok.kind.clone() {
            TokenKind::Ident(s) => {
                self.bump()?;
                Ok(s)
            }
            other => Err(ParseError::UnexpectedToken { expected: "identifier".into(), found: format!("{:?}", other) }),
        }
    }

    fn parse_func(&mut self, prog: &mut Program) -> Result<(), FatalError> {
        self.bump().map_err(|e| self.fatal(e, &Qualifier::none()))?;
        let raw_header = self.expect_ident().map_err(|e| self.fatal(e, &Qualifier::none()))?;
        let header = decompose_func_header(&raw_header).map_err(|e| self.fatal(e, &Qualifier::none()))?;
        let name = header.name.clone();
        let q = Qualifier::func(&name);

        let params = if self.tok.kind == TokenKind::LParen {
            self.parse_param_list(&q)?
        } else {
            Vec::new()
        };
        while self.tok.kind != TokenKind::Newline && self.tok.kind != TokenKind::End {
            self.bump().map_err(|e| self.fatal(e, &q))?;
        }
        if self.tok.kind == TokenKind::Newline {
            self.bump().map_err(|e| self.fatal(e, &q))?;
        }

        // Reserved before the body is parsed (and built into the table via
        // `define_global` below) so a recursive call to this function's own
        // name resolves to `GlobalKind::Function`, not a stray `Extern`
        // stand-in left over from `resolve_operand`. Valid as long as
        // nothing else pushes onto `prog.funcs` while this function's body
        // is being parsed, which holds: callee/address operands only ever
        // declare `Global`s, never `Function`s, until a `.func` block closes.
        let func_id: Id<crate::ir::function::Function> = Id::new(prog.funcs.len() as u32);
        let visibility = header.visibility.unwrap_or(Visibility::Local);
        prog.define_global(Global::new(name.clone(), visibility, header.exported, GlobalKind::Function(func_id)));

        let mut fb = FuncBuilder::new(&name, header.conv.unwrap_or(CallingConv::C), func_id);
        fb.func.visibility = visibility;
        fb.func.exported = header.exported;
        fb.func.vararg = header.vararg;
        fb.func.params = params;
        let entry = fb.synthetic_block(false);
        let mut current = entry;

        loop {
            self.skip_blank().map_err(|e| self.fatal(e, &q))?;
            match self.tok.kind.clone() {
                TokenKind::End => break,
                TokenKind::Ident(s) if s == ".func" => break,
                TokenKind::Ident(name) => {
                    self.bump().map_err(|e| self.fatal(e, &q))?; // ident
                    if self.tok.kind == TokenKind::Colon {
                        self.bump().map_err(|e| self.fatal(e, &q))?; // colon
                        current = fb.block(&name);
                    } else {
                        self.parse_inst(prog, &mut fb, current, &name, &q)?;
                        if fb.func.terminator(current).is_some() {
                            current = fb.synthetic_block(true);
                        }
                    }
                }
                other => {
                    return Err(self.fatal(
                        ParseError::UnexpectedToken { expected: "instruction or label".into(), found: format!("{:?}", other) },
                        &q,
                    ))
                }
            }
        }

        self.resolve_vregs(&mut fb, &q)?;
        let pushed_id = prog.funcs.push(fb.func);
        debug_assert_eq!(pushed_id, func_id, "no global was declared while this function's body was parsed");
        Ok(())
    }

    /// Parses a `.func` header's parenthesized parameter list: comma
    /// separated `TYPE [byval|sret]` entries, e.g. `(i64, ptr byval)`.
    fn parse_param_list(&mut self, q: &Qualifier) -> Result<Vec<(Type, ParamFlags)>, FatalError> {
        self.bump().map_err(|e| self.fatal(e, q))?; // '('
        let mut out = Vec::new();
        loop {
            if self.tok.kind == TokenKind::RParen {
                self.bump().map_err(|e| self.fatal(e, q))?;
                break;
            }
            let ty_name = self.expect_ident().map_err(|e| self.fatal(e, q))?;
            let ty = lookup_type(&ty_name)
                .ok_or_else(|| self.fatal(ParseError::UnexpectedToken { expected: "type".into(), found: ty_name.clone() }, q))?;
            let mut flags = ParamFlags::default();
            while let TokenKind::Ident(modifier) = self.tok.kind.clone() {
                match modifier.as_str() {
                    "byval" => flags.insert(ParamFlags::BYVAL),
                    "sret" => flags.insert(ParamFlags::SRET),
                    _ => break,
                }
                self.bump().map_err(|e| self.fatal(e, q))?;
            }
            out.push((ty, flags));
            if self.tok.kind == TokenKind::Comma {
                self.bump().map_err(|e| self.fatal(e, q))?;
            }
        }
        Ok(out)
    }

    /// Parses a `.data NAME` section: a sequence of `.object` blocks, each
    /// owning one or more labelled atoms (spec §3's Data section → Object →
    /// Atom → Item ownership chain). This directive's exact textual grammar
    /// is this parser's own design (the retrieval pack's C++ sources cover
    /// only the instruction-line grammar).
    fn parse_data(&mut self, prog: &mut Program) -> Result<(), FatalError> {
        self.bump().map_err(|e| self.fatal(e, &Qualifier::none()))?; // '.data'
        let name = self.expect_ident().map_err(|e| self.fatal(e, &Qualifier::none()))?;
        let q = Qualifier::none();
        self.skip_blank().map_err(|e| self.fatal(e, &q))?;
        let mut section = crate::ir::data::DataSection::new(name);
        loop {
            self.skip_blank().map_err(|e| self.fatal(e, &q))?;
            match self.tok.kind.clone() {
                TokenKind::End => break,
                TokenKind::Ident(s) if matches!(s.as_str(), ".func" | ".data" | ".xtor") => break,
                TokenKind::Ident(s) if s == ".object" => {
                    self.bump().map_err(|e| self.fatal(e, &q))?;
                    while self.tok.kind != TokenKind::Newline && self.tok.kind != TokenKind::End {
                        self.bump().map_err(|e| self.fatal(e, &q))?;
                    }
                    if self.tok.kind == TokenKind::Newline {
                        self.bump().map_err(|e| self.fatal(e, &q))?;
                    }
                    let object = prog.push_object();
                    section.objects.push(object);
                    self.parse_object(prog, object, &q)?;
                }
                other => {
                    return Err(self.fatal(
                        ParseError::UnexpectedToken { expected: ".object".into(), found: format!("{:?}", other) },
                        &q,
                    ))
                }
            }
        }
        prog.data.push(section);
        Ok(())
    }

    /// Parses the atoms owned by one `.object` block: each starts with a
    /// `name[.modifiers]:` label line, followed by item directive lines
    /// until the next label, `.object`, or section/program boundary.
    fn parse_object(&mut self, prog: &mut Program, object: Id<crate::ir::data::Object>, q: &Qualifier) -> Result<(), FatalError> {
        let mut current_atom: Option<Id<Atom>> = None;
        loop {
            self.skip_blank().map_err(|e| self.fatal(e, q))?;
            match self.tok.kind.clone() {
                TokenKind::End => break,
                TokenKind::Ident(s) if matches!(s.as_str(), ".func" | ".data" | ".xtor" | ".object") => break,
                TokenKind::Ident(raw) => {
                    self.bump().map_err(|e| self.fatal(e, q))?;
                    if self.tok.kind == TokenKind::Colon {
                        self.bump().map_err(|e| self.fatal(e, q))?;
                        let mut parts = raw.splitn(2, '.');
                        let name = parts.next().unwrap_or(&raw).to_string();
                        let mut visibility = Visibility::Local;
                        let mut exported = false;
                        for part in parts.flat_map(|rest| rest.split('.')) {
                            match part {
                                "local" => visibility = Visibility::Local,
                                "hidden" => visibility = Visibility::Hidden,
                                "extern" => visibility = Visibility::Extern,
                                "export" => exported = true,
                                _ => {}
                            }
                        }
                        let atom = Atom::new(name.clone(), visibility, exported, object);
                        let id = prog.push_atom(atom);
                        prog.define_global(Global::new(name, visibility, exported, GlobalKind::Atom(id)));
                        current_atom = Some(id);
                    } else {
                        let atom = current_atom.ok_or_else(|| {
                            self.fatal(ParseError::UnexpectedToken { expected: "atom label".into(), found: raw.clone() }, q)
                        })?;
                        self.parse_item(prog, atom, &raw, q)?;
                    }
                }
                other => {
                    return Err(self.fatal(
                        ParseError::UnexpectedToken { expected: "atom label or item directive".into(), found: format!("{:?}", other) },
                        q,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Parses one item directive line (`.i8 N`, `.space N`, `.string "..."`,
    /// `.quad SYMBOL[+/-N]`, `.align N`) and appends it to `atom`.
    fn parse_item(&mut self, prog: &mut Program, atom: Id<Atom>, directive: &str, q: &Qualifier) -> Result<(), FatalError> {
        match directive {
            ".align" => {
                let n = self.expect_number(q)?;
                prog.atoms[atom].align = n as u32;
            }
            ".space" => {
                let n = self.expect_number(q)?;
                prog.atoms[atom].items.push(Item::Space(n as u32));
            }
            ".string" | ".ascii" => {
                let s = match self.tok.kind.clone() {
                    TokenKind::String(s) => {
                        self.bump().map_err(|e| self.fatal(e, q))?;
                        s
                    }
                    other => {
                        return Err(self.fatal(ParseError::UnexpectedToken { expected: "string literal".into(), found: format!("{:?}", other) }, q))
                    }
                };
                prog.atoms[atom].items.push(Item::String(s));
            }
            ".i8" | ".i16" | ".i32" | ".i64" | ".f64" | ".quad" => {
                let item = self.parse_item_value(prog, directive, q)?;
                prog.atoms[atom].items.push(item);
            }
            other => return Err(self.fatal(ParseError::UnknownOpcode(other.to_string()), q)),
        }
        while self.tok.kind != TokenKind::Newline && self.tok.kind != TokenKind::End {
            self.bump().map_err(|e| self.fatal(e, q))?;
        }
        if self.tok.kind == TokenKind::Newline {
            self.bump().map_err(|e| self.fatal(e, q))?;
        }
        Ok(())
    }

    fn expect_number(&mut self, q: &Qualifier) -> Result<i128, FatalError> {
        match self.tok.kind.clone() {
            TokenKind::Number(n) => {
                self.bump().map_err(|e| self.fatal(e, q))?;
                Ok(n)
            }
            other => Err(self.fatal(ParseError::UnexpectedToken { expected: "number".into(), found: format!("{:?}", other) }, q)),
        }
    }

    /// A scalar item value is either a plain integer/float literal, or a
    /// symbol reference (optionally `+`/`-` an integer offset), which
    /// interns a `SymbolOffset` expr (spec §3's Expr).
    fn parse_item_value(&mut self, prog: &mut Program, directive: &str, q: &Qualifier) -> Result<Item, FatalError> {
        match self.tok.kind.clone() {
            TokenKind::Number(n) => {
                self.bump().map_err(|e| self.fatal(e, q))?;
                Ok(match directive {
                    ".i8" => Item::Int8(n as i8),
                    ".i16" => Item::Int16(n as i16),
                    ".i32" => Item::Int32(n as i32),
                    ".f64" => Item::Float64(f64::from_bits(n as u64)),
                    _ => Item::Int64(n as i64),
                })
            }
            TokenKind::Ident(name) => {
                self.bump().map_err(|e| self.fatal(e, q))?;
                let mut offset: i64 = 0;
                if matches!(self.tok.kind, TokenKind::Plus | TokenKind::Minus) {
                    let negate = self.tok.kind == TokenKind::Minus;
                    self.bump().map_err(|e| self.fatal(e, q))?;
                    let n = self.expect_number(q)?;
                    offset = if negate { -(n as i64) } else { n as i64 };
                }
                let sym = match prog.lookup(&name) {
                    Some(id) => id,
                    None => prog.declare_global(Global::new(name.clone(), Visibility::Extern, false, GlobalKind::Extern)),
                };
                let expr_id = prog.intern_expr(Expr::SymbolOffset { symbol: sym, offset });
                Ok(Item::Expr(expr_id))
            }
            other => Err(self.fatal(ParseError::UnexpectedToken { expected: "item value".into(), found: format!("{:?}", other) }, q)),
        }
    }

    /// Parses `.xtor (ctor|dtor) PRIORITY NAME`.
    fn parse_xtor(&mut self, prog: &mut Program) -> Result<(), FatalError> {
        let q = Qualifier::none();
        self.bump().map_err(|e| self.fatal(e, &q))?; // '.xtor'
        let kind_name = self.expect_ident().map_err(|e| self.fatal(e, &q))?;
        let kind = match kind_name.as_str() {
            "ctor" => XtorKind::Ctor,
            "dtor" => XtorKind::Dtor,
            other => return Err(self.fatal(ParseError::UnknownXtorKind(other.to_string()), &q)),
        };
        let priority = self.expect_number(&q)? as i32;
        let name = self.expect_ident().map_err(|e| self.fatal(e, &q))?;
        let func = match prog.lookup(&name) {
            Some(id) => id,
            None => prog.declare_global(Global::new(name.clone(), Visibility::Extern, false, GlobalKind::Extern)),
        };
        while self.tok.kind != TokenKind::Newline && self.tok.kind != TokenKind::End {
            self.bump().map_err(|e| self.fatal(e, &q))?;
        }
        if self.tok.kind == TokenKind::Newline {
            self.bump().map_err(|e| self.fatal(e, &q))?;
        }
        prog.xtors.push(Xtor { kind, priority, func });
        Ok(())
    }

    fn parse_operand_list(&mut self) -> Result<Vec<RawOperand>, ParseError> {
        let mut out = Vec::new();
        loop {
            match self.tok.kind.clone() {
                TokenKind::Newline | TokenKind::End => break,
                TokenKind::VReg(n) => {
                    out.push(RawOperand::VReg(n));
                    self.bump()?;
                }
                TokenKind::Ident(s) => {
                    out.push(RawOperand::Ident(s));
                    self.bump()?;
                }
                TokenKind::Number(n) => {
                    out.push(RawOperand::Int(n));
                    self.bump()?;
                }
                TokenKind::Reg(r) => {
                    out.push(RawOperand::Reg(r));
                    self.bump()?;
                }
                TokenKind::Minus => {
                    self.bump()?;
                    if let TokenKind::Number(n) = self.tok.kind.clone() {
                        out.push(RawOperand::Int(-n));
                        self.bump()?;
                    } else {
                        return Err(ParseError::UnexpectedToken { expected: "number".into(), found: format!("{:?}", self.tok.kind) });
                    }
                }
                TokenKind::Comma => {
                    self.bump()?;
                }
                TokenKind::Annot(_, _) => break,
                other => return Err(ParseError::UnexpectedToken { expected: "operand".into(), found: format!("{:?}", other) }),
            }
        }
        Ok(out)
    }

    fn parse_inst(&mut self, prog: &mut Program, fb: &mut FuncBuilder, block: Id<Block>, raw_opcode: &str, q: &Qualifier) -> Result<(), FatalError> {
        let opcode = decompose_opcode(raw_opcode).map_err(|e| self.fatal(e, q))?;
        let operands = self.parse_operand_list().map_err(|e| self.fatal(e, q))?;
        let annots = self.parse_annots(q)?;
        while self.tok.kind != TokenKind::Newline && self.tok.kind != TokenKind::End {
            self.bump().map_err(|e| self.fatal(e, q))?;
        }
        if self.tok.kind == TokenKind::Newline {
            self.bump().map_err(|e| self.fatal(e, q))?;
        }
        self.build_inst(prog, fb, block, opcode, operands, annots, q)
    }

    /// Parses zero or more `@name` / `@name(...)` annotations trailing an
    /// instruction's operand list, decoding any payload via the S-expression
    /// reader (spec §4.1). A payload that fails to decode, or a second
    /// annotation of a kind already seen on this instruction, is a parse
    /// error rather than silently dropped.
    fn parse_annots(&mut self, q: &Qualifier) -> Result<Vec<Annot>, FatalError> {
        let mut out = Vec::new();
        loop {
            match self.tok.kind.clone() {
                TokenKind::Annot(name, payload) => {
                    self.bump().map_err(|e| self.fatal(e, q))?;
                    match payload {
                        Some(text) => {
                            let exp = sexp::parse(&format!("({})", text)).map_err(|e| self.fatal(e, q))?;
                            match annot::decode_annot(&name, &exp) {
                                Some(a) => out.push(a),
                                None => return Err(self.fatal(ParseError::MalformedAnnotation(name), q)),
                            }
                        }
                        None => return Err(self.fatal(ParseError::MalformedAnnotation(name), q)),
                    }
                }
                TokenKind::Comma => {
                    self.bump().map_err(|e| self.fatal(e, q))?;
                }
                _ => break,
            }
        }
        Ok(out)
    }

    fn resolve_block_name(&self, fb: &mut FuncBuilder, name: &str) -> Id<Block> {
        fb.block(name)
    }

    fn build_inst(
        &mut self,
        prog: &mut Program,
        fb: &mut FuncBuilder,
        block: Id<Block>,
        op: Opcode,
        operands: Vec<RawOperand>,
        annots: Vec<Annot>,
        q: &Qualifier,
    ) -> Result<(), FatalError> {
        let types: SmallVec<[Type; 1]> = op.types.iter().copied().collect();
        let num_dests = types.len();
        let mut dest_vregs = Vec::new();
        let mut rest = operands.as_slice();
        if matches!(op.mnemonic.as_str(), "call" | "tailcall" | "invoke" | "add" | "sub" | "and" | "or" | "xor" | "mul" | "cmp" | "mov" | "load" | "phi") {
            for operand in operands.iter().take(num_dests) {
                match operand {
                    RawOperand::VReg(n) => dest_vregs.push(*n),
                    _ => break,
                }
            }
            rest = &operands[dest_vregs.len()..];
        }

        let mut placeholders: Vec<(u32, u64)> = Vec::new();

        let kind = match op.mnemonic.as_str() {
            "mov" => InstKind::Mov,
            "add" => InstKind::Add,
            "sub" => InstKind::Sub,
            "and" => InstKind::And,
            "or" => InstKind::Or,
            "xor" => InstKind::Xor,
            "mul" => InstKind::Mul,
            "cmp" => InstKind::Cmp(op.cond.unwrap_or(CondCode::Eq)),
            "load" => InstKind::Load { width: op.size.unwrap_or(8) },
            "store" => InstKind::Store { width: op.size.unwrap_or(8) },
            "ret" | "return" => InstKind::Return,
            "trap" => InstKind::Trap,
            "raise" => InstKind::Raise,
            "arg" => InstKind::Arg { index: op.size.unwrap_or(0) },
            "jmp" => {
                let label = match rest.first() {
                    Some(RawOperand::Ident(s)) => s.clone(),
                    _ => return Err(self.fatal(ParseError::UnexpectedToken { expected: "block label".into(), found: "?".into() }, q)),
                };
                InstKind::Jmp { target: self.resolve_block_name(fb, &label) }
            }
            "jcc" => {
                let labels: Vec<&String> = rest
                    .iter()
                    .filter_map(|r| if let RawOperand::Ident(s) = r { Some(s) } else { None })
                    .collect();
                if labels.len() < 2 {
                    return Err(self.fatal(ParseError::UnexpectedToken { expected: "two block labels".into(), found: "?".into() }, q));
                }
                let then_ = self.resolve_block_name(fb, labels[0]);
                let else_ = self.resolve_block_name(fb, labels[1]);
                InstKind::Jcc { then_, else_ }
            }
            "call" | "tailcall" | "invoke" => {
                let mut it = rest.iter();
                let callee_raw = it.next().ok_or_else(|| {
                    self.fatal(ParseError::UnexpectedToken { expected: "callee".into(), found: "end of operands".into() }, q)
                })?;
                let callee = resolve_operand(prog, fb, &mut placeholders, 0, callee_raw);
                let mut args = SmallVec::new();
                let mut labels = Vec::new();
                let mut idx = 1u32;
                for raw in it {
                    match raw {
                        RawOperand::Ident(s) => labels.push(s.clone()),
                        other => {
                            args.push(resolve_operand(prog, fb, &mut placeholders, idx, other));
                            idx += 1;
                        }
                    }
                }
                let conv = op.conv.unwrap_or(CallingConv::C);
                let info = CallInfo { callee, args, conv };
                match op.mnemonic.as_str() {
                    "call" => InstKind::Call(info),
                    "tailcall" => InstKind::TailCall(info),
                    _ => {
                        let normal = self.resolve_block_name(fb, labels.first().ok_or_else(|| {
                            self.fatal(ParseError::MissingCallingConvention("invoke".into()), q)
                        })?);
                        let unwind = self.resolve_block_name(fb, labels.get(1).ok_or_else(|| {
                            self.fatal(ParseError::MissingCallingConvention("invoke".into()), q)
                        })?);
                        InstKind::Invoke { info, normal, unwind }
                    }
                }
            }
            "phi" => {
                let mut incoming = Vec::new();
                let mut it = rest.chunks_exact(2);
                let mut idx = 0u32;
                for pair in &mut it {
                    let block_name = match &pair[0] {
                        RawOperand::Ident(s) => s.clone(),
                        _ => {
                            return Err(self.fatal(
                                ParseError::UnexpectedToken { expected: "block label".into(), found: "value".into() },
                                q,
                            ))
                        }
                    };
                    let block_id = self.resolve_block_name(fb, &block_name);
                    let value = resolve_operand(prog, fb, &mut placeholders, idx, &pair[1]);
                    idx += 1;
                    incoming.push((block_id, value));
                }
                InstKind::Phi { incoming }
            }
            other => InstKind::Other { mnemonic: other.to_string() },
        };

        let mut inst = Inst::new(kind, types, block);
        for a in annots {
            let kind = a.kind();
            if !inst.annots.insert(a) {
                return Err(self.fatal(ParseError::DuplicateAnnotation(format!("{:?}", kind)), q));
            }
        }
        for (i, raw) in rest.iter().enumerate() {
            if matches!(op.mnemonic.as_str(), "jmp" | "jcc" | "call" | "tailcall" | "invoke" | "phi") {
                break;
            }
            inst.operands.push(resolve_operand(prog, fb, &mut placeholders, i as u32, raw));
        }
        if let Some(info) = inst.kind.call_info() {
            inst.operands.push(info.callee.clone());
            inst.operands.extend(info.args.iter().cloned());
        }
        if let InstKind::Phi { incoming } = &inst.kind {
            // Mirrors `incoming` 1:1 so `add_inst`'s operand-linking loop
            // registers a use edge for each value, and the placeholder
            // indices recorded above (one per pair) line up with
            // `set_operand`'s `operands[idx]` when a forward-referenced
            // vreg in a φ gets resolved at function close.
            inst.operands.extend(incoming.iter().map(|(_, v)| v.clone()));
        }

        let global_and_expr_operands: Vec<(u32, ValueRef)> = inst
            .operands
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v, ValueRef::Global(_) | ValueRef::Expr(_)))
            .map(|(i, v)| (i as u32, v.clone()))
            .collect();

        let inst_id = fb.func.add_inst(block, inst, None);
        for (index, value) in global_and_expr_operands {
            let edge = crate::ir::global::UserEdge::Operand { func: fb.program_func_id, inst: inst_id, index };
            match value {
                ValueRef::Global(g) => prog.add_global_user(g, edge),
                ValueRef::Expr(e) => prog.add_expr_user(e, edge),
                _ => unreachable!(),
            }
        }
        for (operand_idx, vreg) in placeholders {
            fb.pending.push((inst_id, operand_idx, vreg, self.pos()));
        }
        for (i, &vreg) in dest_vregs.iter().enumerate() {
            fb.vregs.insert(vreg, (inst_id, i as u32));
        }
        Ok(())
    }

    fn resolve_vregs(&mut self, fb: &mut FuncBuilder, q: &Qualifier) -> Result<(), FatalError> {
        let pending = std::mem::take(&mut fb.pending);
        for (inst_id, operand_idx, vreg, pos) in pending {
            let target = *fb.vregs.get(&vreg).ok_or_else(|| FatalError {
                pos,
                qualifier: q.clone(),
                kind: ParseError::UnexpectedToken { expected: "defined vreg".into(), found: format!("${}", vreg) },
            })?;
            fb.func.set_operand(inst_id, operand_idx, ValueRef::Inst(target.0, target.1));
        }
        Ok(())
    }
}

pub fn parse(src: &str) -> Result<Program, FatalError> {
    Parser::new(src)?.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_section_with_object_and_atom() {
        let prog = parse(
            ".data const\n.object\nmy_atom:\n.i32 5\n.i64 7\n.space 4\n",
        )
        .unwrap();
        assert_eq!(prog.data.len(), 1);
        let section = &prog.data[0];
        assert_eq!(section.name, "const");
        assert_eq!(section.objects.len(), 1);
        let object = &prog.objects[section.objects[0]];
        assert_eq!(object.atoms.len(), 1);
        let atom = &prog.atoms[object.atoms[0]];
        assert_eq!(atom.name, "my_atom");
        assert_eq!(atom.items.len(), 3);
    }

    #[test]
    fn parses_xtor_directive() {
        let prog = parse(".xtor ctor 65535 init_func\n").unwrap();
        assert_eq!(prog.xtors.len(), 1);
        assert_eq!(prog.xtors[0].priority, 65535);
        assert!(matches!(prog.xtors[0].kind, crate::ir::xtor::XtorKind::Ctor));
    }

    #[test]
    fn parses_func_header_modifiers_and_params() {
        let prog = parse(".func f.hidden.fast(i64, i32 byval)\nret\n").unwrap();
        let f = prog.main();
        assert!(f.is_none());
        let id = prog.lookup("f").unwrap();
        let func_id = prog.func_by_global(id).unwrap();
        let func = &prog.funcs[func_id];
        assert_eq!(func.visibility, Visibility::Hidden);
        assert_eq!(func.conv, CallingConv::Fast);
        assert_eq!(func.params.len(), 2);
        assert!(func.params[1].1.contains(ParamFlags::BYVAL));
    }

    #[test]
    fn parses_probability_annotation_on_instruction() {
        let prog = parse(".func f\n  jmp a @probability(1 2)\na:\n  ret\n").unwrap();
        let id = prog.lookup("f").unwrap();
        let func_id = prog.func_by_global(id).unwrap();
        let func = &prog.funcs[func_id];
        let entry = func.entry();
        let jmp_id = func.block_arena[entry].insts[0];
        let jmp = &func.insts[jmp_id];
        assert_eq!(
            jmp.annots.get(crate::ir::annot::AnnotKind::Probability),
            Some(&crate::ir::annot::Annot::Probability { num: 1, den: 2 })
        );
    }
}
