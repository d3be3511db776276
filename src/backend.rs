//! The seam to the machine back ends (spec §1: "the LLVM-driven machine
//! back-ends that consume this IR... are deliberately OUT of scope and
//! treated as external collaborators"). This crate only optimizes a
//! [`crate::ir::program::Program`]; lowering it to an object file or
//! invoking an external linker is someone else's job, represented here as a
//! trait so the driver has somewhere to hand the finished IR without caring
//! who's on the other end.

use crate::common::error::Error;
use crate::ir::program::Program;

/// Consumes an optimized [`Program`] and produces whatever the caller's
/// pipeline needs next (object code, another IR, a linked binary). The
/// default implementation is a stand-in for the absent LLVM back end: it
/// always fails, so a driver run with no external lowering configured still
/// reports a clear error rather than silently dropping the program.
pub trait ExternalLowering {
    fn lower(&self, prog: &Program, output_path: &str) -> Result<(), Error>;
}

/// Used when no [`ExternalLowering`] is wired in; emits the optimized IR's
/// textual form to `output_path` instead of attempting machine lowering, so
/// `llir-opt` is still useful as a pure optimizer even with no back end
/// attached.
pub struct TextualLowering;

impl ExternalLowering for TextualLowering {
    fn lower(&self, prog: &Program, output_path: &str) -> Result<(), Error> {
        let text = crate::frontend::writer::emit_program(prog);
        std::fs::write(output_path, text).map_err(|e| Error::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::program::Program;

    #[test]
    fn textual_lowering_round_trips_an_empty_program() {
        let prog = Program::new();
        let path = std::env::temp_dir().join("llir_opt_textual_lowering_test.ll");
        let lowering = TextualLowering;
        lowering.lower(&prog, path.to_str().unwrap()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, crate::frontend::writer::emit_program(&Program::new()));
        let _ = std::fs::remove_file(&path);
    }
}
