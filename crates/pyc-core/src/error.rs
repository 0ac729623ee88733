//! Error types for object-model, opcode, and builder operations.

use thiserror::Error;

use crate::object::ObjectId;

/// Errors that can occur while building or interpreting bytecode objects.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown python version: {0}")]
    UnknownVersion(String),

    #[error("mnemonic {0} is not in the opcode table")]
    UnknownMnemonic(String),

    #[error("instruction stream has odd length {0}")]
    OddLength(usize),

    #[error("object {0} is not in the graph")]
    MissingObject(ObjectId),

    #[error("object {id} is not a {expected}")]
    UnexpectedObject { id: ObjectId, expected: &'static str },

    #[error("graph has no root object")]
    NoRoot,

    #[error("opcode table JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
