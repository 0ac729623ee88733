//! Core data structures for compiled Python bytecode.
//!
//! A `.pyc` payload is a graph of marshalled objects rooted at a code object.
//! This crate models that graph as an arena ([`ObjectGraph`]) addressed by
//! [`ObjectId`], together with the version table that maps header magic
//! numbers to code-object layouts, the opcode tables needed to decode and
//! assemble instruction streams, and a [`ProgramBuilder`] that produces
//! executable code objects.

pub mod builder;
pub mod code;
pub mod disasm;
pub mod error;
pub mod hash;
pub mod instruction;
pub mod object;
pub mod opcode;
pub mod version;

pub use builder::ProgramBuilder;
pub use code::{CodeFlags, CodeObject, CodeVariables};
pub use error::CoreError;
pub use instruction::Instruction;
pub use object::{LongInt, Object, ObjectGraph, ObjectId};
pub use opcode::OpcodeTable;
pub use version::{CodeLayout, PythonVersion};
