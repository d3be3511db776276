//! `llir-opt`: an optimizer for a machine-independent SSA intermediate
//! representation (spec §1/§2). The front end parses a textual IR into the
//! data model in [`ir`]; [`analysis`] builds the structural and
//! interprocedural views consumed by the transform passes in [`passes`];
//! [`driver`] wires the whole pipeline to a linker-flavored CLI and hands
//! the result to a [`backend::ExternalLowering`].

pub mod analysis;
pub mod backend;
pub mod common;
pub mod driver;
pub mod frontend;
pub mod ir;
pub mod passes;
