//! The backend walks the typed AST and produces i386 instructions, which
//! leave the crate either as assembler text for the external toolchain or,
//! for pre-assembled bytes, as a minimal ELF32 image.
//!
//! Compilation is one literal pre-scan pass followed by one code generation
//! pass, single threaded, with no recovery: the first error aborts the unit.

use std::process::ExitStatus;

use colored::Colorize;

use crate::{
    intern::InternedSymbol,
    middle::ty::{Type, UnsizableType},
};

pub mod codegen;
pub mod elf;
pub mod runtime;
pub mod stack;
pub mod toolchain;
pub mod x86;

/// Options controlling code generation output
#[derive(Debug, Clone, Copy, Default)]
pub struct CodegenOptions {
    /// Annotate emitted instructions with what the generator was doing
    pub comments: bool,
    /// Include the hex-dump debugging helpers in the runtime prelude
    pub debug_runtime: bool,
}

/// Everything that can abort a compilation. No variant is retried; the
/// backend performs a single linear attempt per invocation.
#[derive(Debug)]
pub enum CodegenError {
    /// An identifier reached the generator without a resolved type binding
    MissingBinding { name: InternedSymbol },
    /// A name was found in no scope and not in the global table
    UndefinedName { name: InternedSymbol },
    /// A name other than the discard wildcard was defined twice in one scope
    DuplicateDefinition { name: InternedSymbol, scope: String },
    /// A call target that is not a function
    NotCallable { name: InternedSymbol, ty: Type },
    /// An expression statement whose value is not a discardable tuple
    UnusedValue { ty: Type },
    /// A string literal that was never collected by the pre-scan pass
    UnknownLiteral { text: InternedSymbol },
    /// A language feature the generator does not implement yet
    UnsupportedConstruct { construct: &'static str },
    /// A value whose slot width cannot be moved through the stack
    UnsupportedOperandSize { ty: Type, size: u32 },
    Unsizable(UnsizableType),
    /// An external tool was not on the search path
    ToolNotFound { tool: &'static str },
    /// An external tool ran but exited unsuccessfully
    ToolFailed { tool: &'static str, status: ExitStatus },
    /// A value does not fit one of the image format's 32-bit fields
    EncodingOverflow { field: &'static str, value: u64 },
    Io(std::io::Error),
}

impl core::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::MissingBinding { name } => write!(
                f,
                "there is no type information in identifier {}",
                name.value().cyan()
            ),
            CodegenError::UndefinedName { name } => write!(
                f,
                "there is no variable or function named {}",
                name.value().cyan()
            ),
            CodegenError::DuplicateDefinition { name, scope } => write!(
                f,
                "cannot define already existing variable {} in scope {scope}",
                name.value().cyan()
            ),
            CodegenError::NotCallable { name, ty } => {
                write!(f, "{} of type {ty} is not callable", name.value().cyan())
            }
            CodegenError::UnusedValue { ty } => {
                write!(f, "value of type {ty} is not used")
            }
            CodegenError::UnknownLiteral { text } => write!(
                f,
                "string literal {:?} is missing from the literal pool",
                text.value()
            ),
            CodegenError::UnsupportedConstruct { construct } => {
                write!(f, "not yet implemented: {construct}")
            }
            CodegenError::UnsupportedOperandSize { ty, size } => write!(
                f,
                "cannot move values of type {ty} ({size} bytes) through the stack"
            ),
            CodegenError::Unsizable(inner) => write!(f, "{inner}"),
            CodegenError::ToolNotFound { tool } => {
                write!(f, "could not find {} on the search path", tool.cyan())
            }
            CodegenError::ToolFailed { tool, status } => {
                write!(f, "{} failed: {status}", tool.cyan())
            }
            CodegenError::EncodingOverflow { field, value } => {
                write!(f, "{field} value {value} does not fit in an ELF32 field")
            }
            CodegenError::Io(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for CodegenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodegenError::Unsizable(inner) => Some(inner),
            CodegenError::Io(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<UnsizableType> for CodegenError {
    fn from(inner: UnsizableType) -> Self {
        CodegenError::Unsizable(inner)
    }
}

impl From<std::io::Error> for CodegenError {
    fn from(inner: std::io::Error) -> Self {
        CodegenError::Io(inner)
    }
}
