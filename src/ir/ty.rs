//! Scalar types, calling conventions and visibility, mirroring
//! `original_source/core/type.h` and `core/attr.h`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    I128,
    F32,
    F64,
    F80,
    F128,
    V64,
}

impl Type {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 | Type::V64 => 8,
            Type::F80 => 10,
            Type::I128 | Type::F128 => 16,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64 | Type::F80 | Type::F128)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::I128 => "i128",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::F80 => "f80",
            Type::F128 => "f128",
            Type::V64 => "v64",
        };
        f.write_str(s)
    }
}

/// Calling convention tag (spec §3, `original_source/core/attr.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConv {
    C,
    Fast,
    Caml,
    CamlAlloc,
    CamlGc,
    CamlRaise,
}

impl fmt::Display for CallingConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallingConv::C => "c",
            CallingConv::Fast => "fast",
            CallingConv::Caml => "caml",
            CallingConv::CamlAlloc => "caml_alloc",
            CallingConv::CamlGc => "caml_gc",
            CallingConv::CamlRaise => "caml_raise",
        };
        f.write_str(s)
    }
}

/// Visibility of a [`crate::ir::global::Global`] (spec §3: `Extern | Hidden | Local`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Extern,
    Hidden,
    Local,
}

/// Condition code for compares and conditional jumps, including the ordered
/// and unordered floating-point variants from spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondCode {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    O,
    Oeq,
    One,
    Olt,
    Ogt,
    Ole,
    Oge,
    Uo,
    Ueq,
    Une,
    Ult,
    Ugt,
    Ule,
    Uge,
}

impl fmt::Display for CondCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CondCode::Eq => "eq",
            CondCode::Ne => "ne",
            CondCode::Lt => "lt",
            CondCode::Le => "le",
            CondCode::Gt => "gt",
            CondCode::Ge => "ge",
            CondCode::O => "o",
            CondCode::Oeq => "oeq",
            CondCode::One => "one",
            CondCode::Olt => "olt",
            CondCode::Ogt => "ogt",
            CondCode::Ole => "ole",
            CondCode::Oge => "oge",
            CondCode::Uo => "uo",
            CondCode::Ueq => "ueq",
            CondCode::Une => "une",
            CondCode::Ult => "ult",
            CondCode::Ugt => "ugt",
            CondCode::Ule => "ule",
            CondCode::Uge => "uge",
        };
        f.write_str(s)
    }
}
