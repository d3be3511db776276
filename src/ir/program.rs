//! `Program`: the top-level container (spec §3).

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::ir::arena::{Arena, Id};
use crate::ir::data::{Atom, DataSection, Object};
use crate::ir::expr::Expr;
use crate::ir::function::Function;
use crate::ir::global::{Global, GlobalKind, UserEdge};
use crate::ir::inst::Inst;
use crate::ir::xtor::Xtor;

#[derive(Debug, Default)]
pub struct Program {
    pub funcs: Arena<Function>,
    pub atoms: Arena<Atom>,
    pub objects: Arena<Object>,
    pub data: Vec<DataSection>,
    pub xtors: Vec<Xtor>,

    globals: Arena<Global>,
    /// Insertion-ordered so iteration (and thus emitted textual IR, bitcode
    /// layout) is deterministic; grounded in `examples/parcadei-ouros`'s use
    /// of `indexmap` for the same reason (SPEC_FULL.md §10).
    names: IndexMap<String, Id<Global>>,

    exprs: Arena<Expr>,
    expr_intern: HashMap<Expr, Id<Expr>>,

    /// Program-wide user lists for `Global`s and `Expr`s (an `Inst`'s
    /// operand list is the actual edge; this is the reverse index).
    global_users: HashMap<Id<Global>, Vec<UserEdge>>,
    expr_users: HashMap<Id<Expr>, Vec<UserEdge>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new global under `name`. Per spec §3 "name lookup across a
    /// program is unique; duplicate insertion resolves by linkage rules
    /// described in §7" — callers (the parser, the linker) are responsible
    /// for resolving a collision before calling this; this returns the
    /// existing id unchanged when `name` is already taken, which the
    /// caller interprets as "needs linkage resolution".
    pub fn declare_global(&mut self, global: Global) -> Id<Global> {
        if let Some(&id) = self.names.get(&global.name) {
            return id;
        }
        let name = global.name.clone();
        let id = self.globals.push(global);
        self.names.insert(name, id);
        id
    }

    /// Declares `global` under its name, or if a name collision hits a
    /// forward-reference placeholder (an `Extern` auto-declared by an
    /// earlier symbol operand, spec §4.1), upgrades that placeholder in
    /// place to the real definition instead of leaving it stuck as
    /// `Extern`. Used by the parser when it finishes a function/atom whose
    /// name was already referenced (e.g. a recursive call, or a forward
    /// call from a function parsed earlier).
    pub fn define_global(&mut self, global: Global) -> Id<Global> {
        if let Some(&id) = self.names.get(&global.name) {
            if matches!(self.globals[id].kind, GlobalKind::Extern) {
                let Global { visibility, exported, kind, .. } = global;
                let g = &mut self.globals[id];
                g.visibility = visibility;
                g.exported = exported;
                g.kind = kind;
            }
            return id;
        }
        let name = global.name.clone();
        let id = self.globals.push(global);
        self.names.insert(name, id);
        id
    }

    pub fn global(&self, id: Id<Global>) -> &Global {
        &self.globals[id]
    }

    pub fn global_mut(&mut self, id: Id<Global>) -> &mut Global {
        &mut self.globals[id]
    }

    pub fn lookup(&self, name: &str) -> Option<Id<Global>> {
        self.names.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (Id<Global>, &Global)> {
        self.globals.iter()
    }

    pub fn add_global_user(&mut self, target: Id<Global>, edge: UserEdge) {
        self.global_users.entry(target).or_default().push(edge);
    }

    pub fn remove_global_user(&mut self, target: Id<Global>, edge: UserEdge) {
        if let Some(users) = self.global_users.get_mut(&target) {
            users.retain(|&e| e != edge);
        }
    }

    pub fn global_users(&self, target: Id<Global>) -> &[UserEdge] {
        self.global_users.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Interns a `SymbolOffset` expr so repeated references to the same
    /// (symbol, offset) pair share one node (spec §3: "Expr is
    /// shared/interned"). Registers the expr as a user of its symbol (spec
    /// §3: "Expr participates in the use list of its referenced symbol"),
    /// so every call site gets this for free rather than each one having to
    /// remember to.
    pub fn intern_expr(&mut self, expr: Expr) -> Id<Expr> {
        if let Some(&id) = self.expr_intern.get(&expr) {
            return id;
        }
        let symbol = expr.symbol();
        let id = self.exprs.push(expr);
        self.expr_intern.insert(expr, id);
        self.add_global_user(symbol, UserEdge::Expr(id));
        id
    }

    pub fn expr(&self, id: Id<Expr>) -> &Expr {
        &self.exprs[id]
    }

    pub fn add_expr_user(&mut self, target: Id<Expr>, edge: UserEdge) {
        self.expr_users.entry(target).or_default().push(edge);
    }

    pub fn remove_expr_user(&mut self, target: Id<Expr>, edge: UserEdge) {
        if let Some(users) = self.expr_users.get_mut(&target) {
            users.retain(|&e| e != edge);
        }
    }

    pub fn expr_users(&self, target: Id<Expr>) -> &[UserEdge] {
        self.expr_users.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn func_by_global(&self, id: Id<Global>) -> Option<Id<Function>> {
        match self.global(id).kind {
            GlobalKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The reverse of `func_by_global`; `O(n)` over the global table, used
    /// by the forwarder's single-use-callee predicate, which is only
    /// evaluated once per call site rather than in a hot loop.
    pub fn global_by_func(&self, func: Id<Function>) -> Option<Id<Global>> {
        self.globals.iter().find(|(_, g)| matches!(g.kind, GlobalKind::Function(f) if f == func)).map(|(id, _)| id)
    }

    pub fn atom_by_global(&self, id: Id<Global>) -> Option<Id<Atom>> {
        match self.global(id).kind {
            GlobalKind::Atom(a) => Some(a),
            _ => None,
        }
    }

    /// Reserves a fresh, empty object, to be populated with atoms via
    /// [`Program::push_atom`] (an object always owns at least one atom once
    /// parsing of its `.data` entry completes, but is created empty first so
    /// atoms can name it as their `owner` as they're built).
    pub fn push_object(&mut self) -> Id<Object> {
        self.objects.push(Object::default())
    }

    /// Adds `atom` (already carrying `owner` as set by its constructor) to
    /// both the atom arena and its owning object's atom list.
    pub fn push_atom(&mut self, atom: Atom) -> Id<Atom> {
        let owner = atom.owner;
        let id = self.atoms.push(atom);
        self.objects[owner].atoms.push(id);
        id
    }

    /// The entry function, if any function is named `main`, mirroring the
    /// call graph's virtual entry node construction (spec §4.3).
    pub fn main(&self) -> Option<Id<Function>> {
        self.lookup("main").and_then(|id| self.func_by_global(id))
    }

    /// Erases `inst` from `func`, first disconnecting any `Global`/`Expr`
    /// operands from their program-level user lists before delegating to
    /// `Function::erase_inst` for the intra-function (`Inst`-target) half.
    /// Passes that remove instructions (the forwarder's store folding, the
    /// allocation inliner) go through this rather than `Function::erase_inst`
    /// directly so the use-def graph stays consistent (spec §3/§8).
    pub fn erase_inst(&mut self, func: Id<Function>, inst: Id<Inst>) {
        let operands = self.funcs[func].insts[inst].operands.clone();
        for (index, operand) in operands.iter().enumerate() {
            let edge = UserEdge::Operand { func, inst, index: index as u32 };
            match operand {
                crate::ir::value::ValueRef::Global(g) => self.remove_global_user(*g, edge),
                crate::ir::value::ValueRef::Expr(e) => self.remove_expr_user(*e, edge),
                _ => {}
            }
        }
        self.funcs[func].erase_inst(inst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ty::Visibility;

    #[test]
    fn declare_global_is_idempotent_by_name() {
        let mut prog = Program::new();
        let a = prog.declare_global(Global::new("foo", Visibility::Local, false, GlobalKind::Extern));
        let b = prog.declare_global(Global::new("foo", Visibility::Extern, true, GlobalKind::Extern));
        assert_eq!(a, b);
        assert_eq!(prog.global(a).visibility, Visibility::Local);
    }

    #[test]
    fn expr_interning_shares_nodes() {
        let mut prog = Program::new();
        let sym = prog.declare_global(Global::new("g", Visibility::Local, false, GlobalKind::Extern));
        let e1 = prog.intern_expr(Expr::SymbolOffset { symbol: sym, offset: 4 });
        let e2 = prog.intern_expr(Expr::SymbolOffset { symbol: sym, offset: 4 });
        assert_eq!(e1, e2);
    }
}
