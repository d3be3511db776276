//! The driver (spec §6): parses the linker-flavored CLI surface and
//! environment variables, runs the optimizer pipeline over every input, and
//! hands the result to an [`ExternalLowering`] implementation.
//!
//! Flag tokenizing uses `clap`'s derive API (grounded in
//! `examples/other_examples/manifests/0xMiden-compiler`'s use of the same
//! crate for a compiler-toolchain CLI); the shape of the flags themselves,
//! the `-O{0..4|s}` level encoding, and the env-var fallback chain are
//! unchanged from spec §6. `Driver` itself, its `verbose` gate, and the
//! read-CLI-once-at-startup construction follow the teacher's own
//! `driver/driver.rs` `Driver::new()` + populate-fields style.

use std::fmt;
use std::path::PathBuf;

use clap::Parser;

use crate::common::error::Error;
use crate::ir::program::Program;
use crate::passes::{alloc_inline, global_forward};

/// Optimization level (spec §6's `-O{0..4|s}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
    O4,
    Os,
}

impl std::str::FromStr for OptLevel {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Self::O0),
            "1" => Ok(Self::O1),
            "2" => Ok(Self::O2),
            "3" => Ok(Self::O3),
            "4" => Ok(Self::O4),
            "s" => Ok(Self::Os),
            other => Err(DriverError::BadOptLevel(other.to_string())),
        }
    }
}

/// `-Bstatic`/`-Bdynamic`: whether subsequent `-l` flags prefer a static or
/// dynamic archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Static,
    Dynamic,
}

/// One `--start-group ... --end-group` nesting level, or a bare library/
/// object reference outside any group (spec §6; groups re-scan their
/// members until no new symbol is resolved, which is the linker's job, not
/// this optimizer's — this crate only tracks the nesting so `--start-group`
/// without a match is rejected as spec §7 requires).
#[derive(Debug, Clone, Default)]
struct GroupStack(Vec<()>);

impl GroupStack {
    fn push(&mut self) {
        self.0.push(());
    }

    fn pop(&mut self) -> Result<(), DriverError> {
        if self.0.pop().is_none() {
            return Err(DriverError::UnmatchedEndGroup);
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), DriverError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(DriverError::UnmatchedStartGroup)
        }
    }
}

/// Errors specific to the driver's own CLI/env handling, kept separate from
/// [`crate::common::error::Error`] (the pipeline's lex/parse/sema/link
/// taxonomy) since these are about invocation, not about an input program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    BadOptLevel(String),
    UnmatchedStartGroup,
    UnmatchedEndGroup,
    NoInputFiles,
    /// No [`ExternalLowering`] was configured to turn the optimized IR into
    /// the requested output format.
    Unimplemented,
    Pipeline(Error),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadOptLevel(s) => write!(f, "invalid optimization level: -O{}", s),
            Self::UnmatchedStartGroup => write!(f, "--start-group without matching --end-group"),
            Self::UnmatchedEndGroup => write!(f, "--end-group without matching --start-group"),
            Self::NoInputFiles => write!(f, "no input files"),
            Self::Unimplemented => write!(f, "no external lowering configured for this output"),
            Self::Pipeline(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<Error> for DriverError {
    fn from(e: Error) -> Self {
        Self::Pipeline(e)
    }
}

/// Raw CLI surface (spec §6's linker flag set), tokenized by `clap`.
#[derive(Debug, Parser)]
#[command(name = "llir-opt", about = "Optimizer for a machine-independent SSA intermediate representation")]
struct Cli {
    /// Input object files, archives and IR files.
    inputs: Vec<PathBuf>,

    #[arg(short = 'o')]
    output: Option<PathBuf>,

    #[arg(short = 'O')]
    opt_level: Option<String>,

    #[arg(long)]
    shared: bool,
    #[arg(long)]
    static_: bool,
    #[arg(long = "Bstatic")]
    bstatic: bool,
    #[arg(long = "Bdynamic")]
    bdynamic: bool,
    #[arg(long)]
    whole_archive: bool,
    #[arg(long)]
    no_whole_archive: bool,
    #[arg(long)]
    start_group: bool,
    #[arg(long)]
    end_group: bool,
    #[arg(long)]
    eh_frame_hdr: bool,
    #[arg(long)]
    nostdlib: bool,

    #[arg(short = 'L')]
    lib_paths: Vec<PathBuf>,
    #[arg(short = 'l')]
    libs: Vec<String>,
    #[arg(short = 'e')]
    entry: Option<String>,
    #[arg(short = 'u')]
    undefined: Vec<String>,
    #[arg(long)]
    export_dynamic: bool,
    #[arg(short = 'r')]
    relocatable: bool,

    #[arg(long)]
    mcpu: Option<String>,
    #[arg(long)]
    mabi: Option<String>,
    #[arg(long)]
    mfs: Option<String>,

    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Output format, inferred from the `-o` path's extension (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Obj,
    LlirText,
    Bitcode,
    Asm,
    Exe,
}

fn infer_format(path: &std::path::Path) -> OutputFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("o") => OutputFormat::Obj,
        Some("llir") => OutputFormat::LlirText,
        Some("llbc") => OutputFormat::Bitcode,
        Some("s") | Some("S") => OutputFormat::Asm,
        _ => OutputFormat::Exe,
    }
}

/// The driver's resolved configuration, CLI flags overlaid on the
/// `LLIR_OPT_*`/`LLIR_LD_SAVE` environment variables (spec §6/§7: "`Driver`
/// fields populated from CLI flags... plus the environment variables... read
/// once at start-up").
pub struct Driver {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub opt_level: OptLevel,
    pub shared: bool,
    pub static_: bool,
    pub link_mode: LinkMode,
    pub whole_archive: bool,
    pub eh_frame_hdr: bool,
    pub nostdlib: bool,
    pub lib_paths: Vec<PathBuf>,
    pub libs: Vec<String>,
    pub entry: Option<String>,
    pub undefined: Vec<String>,
    pub export_dynamic: bool,
    pub relocatable: bool,
    pub mcpu: Option<String>,
    pub mabi: Option<String>,
    pub mfs: Option<String>,
    pub verbose: bool,
    /// `LLIR_LD_SAVE`: if set, every input blob handed to the optimizer is
    /// snapshotted into a numbered file under this directory.
    pub save_dir: Option<PathBuf>,
}

impl Driver {
    /// Builds a `Driver` from `args` (normally `std::env::args()`) overlaid
    /// with `LLIR_OPT_*`/`LLIR_LD_SAVE` from the environment, validating
    /// `--start-group`/`--end-group` nesting as it goes.
    pub fn from_args<I, S>(args: I) -> Result<Self, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::parse_from(args);

        if cli.inputs.is_empty() {
            return Err(DriverError::NoInputFiles);
        }

        let mut groups = GroupStack::default();
        if cli.start_group {
            groups.push();
        }
        if cli.end_group {
            groups.pop()?;
        }
        groups.finish()?;

        let opt_level = match &cli.opt_level {
            Some(level) => level.parse()?,
            None => std::env::var("LLIR_OPT_O").ok().and_then(|v| v.parse().ok()).unwrap_or(OptLevel::O0),
        };

        let link_mode = if cli.bstatic {
            LinkMode::Static
        } else if cli.bdynamic {
            LinkMode::Dynamic
        } else {
            LinkMode::Dynamic
        };

        let mcpu = cli.mcpu.or_else(|| std::env::var("LLIR_OPT_CPU").ok());
        let mabi = cli.mabi.or_else(|| std::env::var("LLIR_OPT_ABI").ok());
        let mfs = cli.mfs.or_else(|| std::env::var("LLIR_OPT_FS").ok());
        let save_dir = std::env::var("LLIR_LD_SAVE").ok().map(PathBuf::from);

        let output = cli.output.unwrap_or_else(|| PathBuf::from("a.out"));

        Ok(Self {
            inputs: cli.inputs,
            output,
            opt_level,
            shared: cli.shared,
            static_: cli.static_,
            link_mode,
            whole_archive: cli.whole_archive && !cli.no_whole_archive,
            eh_frame_hdr: cli.eh_frame_hdr,
            nostdlib: cli.nostdlib,
            lib_paths: cli.lib_paths,
            libs: cli.libs,
            entry: cli.entry,
            undefined: cli.undefined,
            export_dynamic: cli.export_dynamic,
            relocatable: cli.relocatable,
            mcpu,
            mabi,
            mfs,
            verbose: cli.verbose,
            save_dir,
        })
    }

    pub fn output_format(&self) -> OutputFormat {
        infer_format(&self.output)
    }

    /// Parses every input, runs the optimizer pipeline gated by
    /// `self.opt_level`, and hands the result to `lowering`. Printing pass
    /// `Stats` when `self.verbose` is the driver's only diagnostic
    /// narration (spec §7's ambient logging policy).
    pub fn run(&self, lowering: &dyn crate::backend::ExternalLowering) -> Result<(), DriverError> {
        let mut programs = Vec::new();
        for (index, path) in self.inputs.iter().enumerate() {
            let source = std::fs::read_to_string(path).map_err(|e| DriverError::Pipeline(Error::Io(e.to_string())))?;
            if let Some(dir) = &self.save_dir {
                let snapshot = dir.join(format!("{}.llir", index));
                let _ = std::fs::write(snapshot, &source);
            }
            let prog = crate::frontend::parser::parse(&source).map_err(Error::Parse)?;
            programs.push(prog);
        }

        for prog in &mut programs {
            self.optimize(prog);
        }

        for prog in &programs {
            lowering.lower(prog, self.output.to_string_lossy().as_ref())?;
        }

        Ok(())
    }

    /// Runs the global forwarder and allocation inliner at `-O1` and above,
    /// mirroring the teacher's `opt_level`-gated pass pipeline.
    fn optimize(&self, prog: &mut Program) {
        if self.opt_level == OptLevel::O0 {
            return;
        }
        if let Some(entry) = prog.main() {
            let stats = global_forward::run(prog, entry);
            if self.verbose {
                eprintln!(
                    "llir-opt: global_forward: folded {} store(s), killed {} store(s)",
                    stats.stores_folded, stats.stores_killed
                );
            }
        }
        let stats = alloc_inline::run(prog);
        if self.verbose {
            eprintln!("llir-opt: alloc_inline: inlined {} allocation site(s)", stats.sites_inlined);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_group_without_end_group_is_rejected() {
        let err = Driver::from_args(["llir-opt", "--start-group", "a.o"]).unwrap_err();
        assert_eq!(err, DriverError::UnmatchedStartGroup);
    }

    #[test]
    fn end_group_without_start_group_is_rejected() {
        let err = Driver::from_args(["llir-opt", "--end-group", "a.o"]).unwrap_err();
        assert_eq!(err, DriverError::UnmatchedEndGroup);
    }

    #[test]
    fn balanced_group_parses() {
        let driver = Driver::from_args(["llir-opt", "--start-group", "a.o", "--end-group"]).unwrap();
        assert_eq!(driver.inputs, vec![PathBuf::from("a.o")]);
    }

    #[test]
    fn no_inputs_is_rejected() {
        let err = Driver::from_args(["llir-opt"]).unwrap_err();
        assert_eq!(err, DriverError::NoInputFiles);
    }

    #[test]
    fn output_format_is_inferred_from_extension() {
        let driver = Driver::from_args(["llir-opt", "-o", "out.llir", "a.o"]).unwrap();
        assert_eq!(driver.output_format(), OutputFormat::LlirText);
    }

    #[test]
    fn opt_level_flag_overrides_default() {
        let driver = Driver::from_args(["llir-opt", "-O", "2", "a.o"]).unwrap();
        assert_eq!(driver.opt_level, OptLevel::O2);
    }
}
