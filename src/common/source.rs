//! Source position tracking for the textual IR lexer/parser.

/// A 1-indexed (row, column) position in a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos {
    pub row: u32,
    pub col: u32,
}

impl Pos {
    pub fn start() -> Self {
        Self { row: 1, col: 0 }
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// Optional function/block qualification attached to a diagnostic, matching
/// the three `Lexer::Error` overloads of the textual format (bare position,
/// position + function, position + function + block).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Qualifier {
    pub func_name: Option<String>,
    pub block_name: Option<String>,
}

impl Qualifier {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn func(name: impl Into<String>) -> Self {
        Self { func_name: Some(name.into()), block_name: None }
    }

    pub fn func_block(func: impl Into<String>, block: impl Into<String>) -> Self {
        Self { func_name: Some(func.into()), block_name: Some(block.into()) }
    }
}

impl std::fmt::Display for Qualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.func_name, &self.block_name) {
            (Some(func), Some(block)) => write!(f, ": {}:{}", func, block),
            (Some(func), None) => write!(f, ": {}", func),
            (None, _) => Ok(()),
        }
    }
}
