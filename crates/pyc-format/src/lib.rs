//! Reading and writing compiled Python bytecode containers (`.pyc`).
//!
//! ## File Layout
//!
//! ```text
//! PYC File Layout:
//! ┌──────────────────────────────────┐
//! │ Magic: u16 LE + "\r\n"           │  4 bytes
//! │ Flags: u32 LE                    │  4 bytes
//! │ Source mtime or hash (low half)  │  4 bytes
//! │ Source size or hash (high half)  │  4 bytes
//! ├──────────────────────────────────┤
//! │ Marshal payload                  │
//! │   one root object, normally a    │
//! │   module code object             │
//! └──────────────────────────────────┘
//! ```
//!
//! The magic selects the code-object layout the payload is decoded with.
//! There is no trailer or checksum.

mod container;
mod error;
mod header;
pub mod marshal;
mod validate;

pub use container::PycFile;
pub use error::{FormatError, Result};
pub use header::{decode_header, encode_header, HeaderFlags, PycHeader, HEADER_SIZE};
pub use validate::validate;
