//! The marshal payload codec.
//!
//! Every object starts with a one-byte type tag. Bit 7 of the tag
//! ([`FLAG_REF`]) registers the object in a reference table as it is read,
//! and tag [`tag::REF`] followed by a `u32` index refers back to a
//! registered object. Registered objects map to arena ids, so shared and
//! cyclic structures decode without raw pointers.

mod reader;
mod writer;

pub use reader::{decode, decode_at, MAX_DEPTH};
pub use writer::{encode, encode_to};

/// Set on a tag when the object is added to the reference table.
pub const FLAG_REF: u8 = 0x80;

/// Marshal type codes.
pub mod tag {
    pub const NULL: u8 = b'0';
    pub const NONE: u8 = b'N';
    pub const FALSE: u8 = b'F';
    pub const TRUE: u8 = b'T';
    pub const STOPITER: u8 = b'S';
    pub const ELLIPSIS: u8 = b'.';
    pub const INT: u8 = b'i';
    pub const INT64: u8 = b'I';
    pub const FLOAT: u8 = b'f';
    pub const BINARY_FLOAT: u8 = b'g';
    pub const COMPLEX: u8 = b'x';
    pub const BINARY_COMPLEX: u8 = b'y';
    pub const LONG: u8 = b'l';
    pub const STRING: u8 = b's';
    pub const INTERNED: u8 = b't';
    pub const REF: u8 = b'r';
    pub const TUPLE: u8 = b'(';
    pub const LIST: u8 = b'[';
    pub const DICT: u8 = b'{';
    pub const CODE: u8 = b'c';
    pub const UNICODE: u8 = b'u';
    pub const SET: u8 = b'<';
    pub const FROZENSET: u8 = b'>';
    pub const ASCII: u8 = b'a';
    pub const ASCII_INTERNED: u8 = b'A';
    pub const SMALL_TUPLE: u8 = b')';
    pub const SHORT_ASCII: u8 = b'z';
    pub const SHORT_ASCII_INTERNED: u8 = b'Z';
}
