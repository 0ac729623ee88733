use std::io;
use std::path::PathBuf;

use thiserror::Error;

use pyc_core::{CodeLayout, CoreError, ObjectId};

/// Errors that can occur while reading or writing containers.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("header needs 16 bytes, found {found}")]
    MalformedHeader { found: usize },

    #[error("unsupported format: unknown magic {magic:02x?}")]
    UnsupportedFormat { magic: [u8; 4] },

    #[error("truncated input at offset {offset}: need {needed} bytes, {remaining} remaining")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("unknown tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("reference {index} at offset {offset} out of range ({available} registered)")]
    InvalidReference {
        index: u32,
        offset: usize,
        available: usize,
    },

    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidString { offset: usize },

    #[error("malformed object at offset {offset}: {detail}")]
    Malformed { offset: usize, detail: String },

    #[error("code object {id} does not fit the {layout:?} layout: {detail}")]
    LayoutMismatch {
        id: ObjectId,
        layout: CodeLayout,
        detail: String,
    },

    #[error("nesting deeper than {limit} levels at offset {offset}")]
    NestingTooDeep { limit: usize, offset: usize },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("object graph has no root")]
    EmptyGraph,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FormatError>;
