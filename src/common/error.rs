//! Diagnostic types for every phase of the pipeline (spec §7).
//!
//! Lexical and syntactic errors are fatal and carry a source position;
//! semantic errors are invariant violations the parser/builder catches
//! at function-close time; linking and I/O errors surface at the driver
//! boundary. Internal invariant violations (malformed CFG, dangling use
//! edges) are not represented here — they `panic!` per spec §7's "passes
//! are forbidden from catching them".

use std::fmt;

use crate::common::source::{Pos, Qualifier};

/// Failure during lexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    UnexpectedChar(char),
    UnterminatedString,
    InvalidEscape(char),
    InvalidNumber,
    UnknownRegister(String),
    EmptyAnnotation,
    InvalidRegisterName,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedChar(c) => write!(f, "unexpected char: {}", c),
            Self::UnterminatedString => write!(f, "unterminated string"),
            Self::InvalidEscape(c) => write!(f, "invalid escape: {}", c),
            Self::InvalidNumber => write!(f, "invalid numeric constant"),
            Self::UnknownRegister(name) => write!(f, "unknown register: {}", name),
            Self::EmptyAnnotation => write!(f, "empty annotation"),
            Self::InvalidRegisterName => write!(f, "invalid register name"),
        }
    }
}

/// Failure during parsing (recursive-descent, opcode decoding, s-expressions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnexpectedToken { expected: String, found: String },
    MissingNewline,
    MalformedAnnotation(String),
    UnknownOpcode(String),
    MissingCallingConvention(String),
    DuplicateAnnotation(String),
    InvalidSExp,
    UnknownXtorKind(String),
    Lex(LexError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedToken { expected, found } => {
                write!(f, "{} expected, got {}", expected, found)
            }
            Self::MissingNewline => write!(f, "newline expected"),
            Self::MalformedAnnotation(name) => write!(f, "malformed annotation: {}", name),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode: {}", op),
            Self::MissingCallingConvention(op) => {
                write!(f, "missing calling convention for: {}", op)
            }
            Self::DuplicateAnnotation(kind) => write!(f, "duplicate annotation: {}", kind),
            Self::InvalidSExp => write!(f, "invalid token in s-expression"),
            Self::UnknownXtorKind(s) => write!(f, "unknown xtor kind: {}", s),
            Self::Lex(e) => write!(f, "{}", e),
        }
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        Self::Lex(e)
    }
}

/// Invariant violations caught at function-close or builder time, surfaced
/// as typed errors rather than panics (spec §7's "Semantic" category).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemaError {
    DuplicateAnnotation(String),
    UndefinedVReg(u64),
    VRegDefinedTwice(u64),
    PhiShapeMismatch { block: String, operand_count: usize },
    OperandTypeMismatch { inst: String, expected: String, found: String },
}

impl fmt::Display for SemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateAnnotation(kind) => write!(f, "duplicate annotation: {}", kind),
            Self::UndefinedVReg(id) => write!(f, "undefined virtual register: ${}", id),
            Self::VRegDefinedTwice(id) => write!(f, "virtual register defined twice: ${}", id),
            Self::PhiShapeMismatch { block, operand_count } => write!(
                f,
                "phi in {} has an odd operand count ({})",
                block, operand_count
            ),
            Self::OperandTypeMismatch { inst, expected, found } => write!(
                f,
                "{}: operand type mismatch, expected {}, found {}",
                inst, expected, found
            ),
        }
    }
}

/// Failure during linking (spec §7's "Linking" category).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    UndefinedSymbol(String),
    MultipleStrongDefinitions(String),
    NestedStartGroup,
    UnmatchedStartGroup,
    MissingLibrary(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedSymbol(sym) => write!(f, "undefined symbol: {}", sym),
            Self::MultipleStrongDefinitions(sym) => {
                write!(f, "multiple strong definitions of: {}", sym)
            }
            Self::NestedStartGroup => write!(f, "nested --start-group"),
            Self::UnmatchedStartGroup => write!(f, "--start-group without matching --end-group"),
            Self::MissingLibrary(name) => write!(f, "missing library: {}", name),
        }
    }
}

/// A fatal, position-qualified lex/parse failure, as required by spec §4.1:
/// "all parse failures include the (row, col) position and, when inside a
/// function or block, qualify with `funcName` and `blockName`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub pos: Pos,
    pub qualifier: Qualifier,
    pub kind: ParseError,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}{}]: {}", self.pos, self.qualifier, self.kind)
    }
}

impl std::error::Error for FatalError {}

/// Top-level error type returned by the driver and every public entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Parse(FatalError),
    Sema(SemaError),
    Link(LinkError),
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{}", e),
            Self::Sema(e) => write!(f, "{}", e),
            Self::Link(e) => write!(f, "{}", e),
            Self::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<FatalError> for Error {
    fn from(e: FatalError) -> Self {
        Self::Parse(e)
    }
}

impl From<SemaError> for Error {
    fn from(e: SemaError) -> Self {
        Self::Sema(e)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
