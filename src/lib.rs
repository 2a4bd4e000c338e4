//! Bootstrap compiler backend for the Creek language.
//!
//! The front end is external to this crate: input arrives as a typed,
//! name-resolved AST ([`middle::ast`]) and leaves either as textual i386
//! assembly handed to the system assembler and linker
//! ([`backend::toolchain`]), or as a minimal ELF32 executable image written
//! directly to bytes ([`backend::elf`]).

pub mod backend;
pub mod index;
pub mod intern;
pub mod middle;
