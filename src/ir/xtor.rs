//! Constructor/destructor registrations (spec §3).

use crate::ir::arena::Id;
use crate::ir::global::Global;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XtorKind {
    Ctor,
    Dtor,
}

#[derive(Debug, Clone)]
pub struct Xtor {
    pub kind: XtorKind,
    pub priority: i32,
    pub func: Id<Global>,
}
