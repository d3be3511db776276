//! Interned expressions (spec §3). Currently one variant, `SymbolOffset`,
//! shared across every instruction that references the same (symbol, offset)
//! pair so the forwarder can fold through it without duplicating nodes.

use crate::ir::arena::Id;
use crate::ir::global::Global;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expr {
    SymbolOffset { symbol: Id<Global>, offset: i64 },
}

impl Expr {
    pub fn symbol(&self) -> Id<Global> {
        match self {
            Expr::SymbolOffset { symbol, .. } => *symbol,
        }
    }

    pub fn offset(&self) -> i64 {
        match self {
            Expr::SymbolOffset { offset, .. } => *offset,
        }
    }
}
