//! The IR data model (spec §3): program → functions → blocks → instructions,
//! globals, data sections, expressions and annotations, plus the use-def
//! graph threaded through all of them.

pub mod annot;
pub mod arena;
pub mod block;
pub mod data;
pub mod expr;
pub mod function;
pub mod global;
pub mod inst;
pub mod program;
pub mod sexp;
pub mod ty;
pub mod value;
pub mod visit;
pub mod xtor;

pub use arena::{Arena, BitSet, Id};
pub use block::Block;
pub use data::{Atom, DataSection, Item, Object};
pub use expr::Expr;
pub use function::Function;
pub use global::{Global, GlobalKind, UserEdge};
pub use inst::{CallInfo, Inst, InstKind, Operand};
pub use program::Program;
pub use ty::{CallingConv, CondCode, Type, Visibility};
pub use xtor::{Xtor, XtorKind};
