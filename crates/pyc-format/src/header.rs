//! The fixed 16-byte container header.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use pyc_core::PythonVersion;

use crate::error::{FormatError, Result};

/// Size of the header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Header flag bits (PEP 552).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct HeaderFlags {
    bits: u32,
}

impl HeaderFlags {
    pub const NONE: HeaderFlags = HeaderFlags { bits: 0 };

    /// Words 2 and 3 hold a source hash instead of mtime and size.
    pub const HASH_BASED: u32 = 0x01;

    /// The importer should check the hash against the source.
    pub const CHECK_SOURCE: u32 = 0x02;

    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    pub fn has(&self, flag: u32) -> bool {
        self.bits & flag != 0
    }

    pub fn set(&mut self, flag: u32) {
        self.bits |= flag;
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }
}

/// Decoded header fields. Unknown flag bits are kept as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PycHeader {
    pub magic: [u8; 4],
    pub flags: HeaderFlags,
    /// Source mtime, or the low half of the source hash.
    pub hash_or_time: u32,
    /// Source size, or the high half of the source hash.
    pub size: u32,
}

/// Pack the four header fields, little-endian.
pub fn encode_header(magic: [u8; 4], flags: u32, hash_or_time: u32, size: u32) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0..4].copy_from_slice(&magic);
    LittleEndian::write_u32(&mut out[4..8], flags);
    LittleEndian::write_u32(&mut out[8..12], hash_or_time);
    LittleEndian::write_u32(&mut out[12..16], size);
    out
}

/// Unpack the header from the start of `bytes`. The magic is not checked
/// here; see [`PycHeader::version`].
pub fn decode_header(bytes: &[u8]) -> Result<PycHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(FormatError::MalformedHeader { found: bytes.len() });
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[0..4]);
    Ok(PycHeader {
        magic,
        flags: HeaderFlags::new(LittleEndian::read_u32(&bytes[4..8])),
        hash_or_time: LittleEndian::read_u32(&bytes[8..12]),
        size: LittleEndian::read_u32(&bytes[12..16]),
    })
}

impl PycHeader {
    /// Timestamp-based header, the interpreter's default.
    pub fn timestamped(version: PythonVersion, mtime: u32, source_size: u32) -> Self {
        Self {
            magic: version.magic(),
            flags: HeaderFlags::NONE,
            hash_or_time: mtime,
            size: source_size,
        }
    }

    /// Hash-based header carrying a 64-bit source hash.
    pub fn hashed(version: PythonVersion, hash: u64, check_source: bool) -> Self {
        let mut flags = HeaderFlags::new(HeaderFlags::HASH_BASED);
        if check_source {
            flags.set(HeaderFlags::CHECK_SOURCE);
        }
        Self {
            magic: version.magic(),
            flags,
            hash_or_time: hash as u32,
            size: (hash >> 32) as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        encode_header(self.magic, self.flags.bits(), self.hash_or_time, self.size)
    }

    /// The release the magic belongs to.
    pub fn version(&self) -> Result<PythonVersion> {
        PythonVersion::from_magic(self.magic)
            .ok_or(FormatError::UnsupportedFormat { magic: self.magic })
    }

    pub fn is_hash_based(&self) -> bool {
        self.flags.has(HeaderFlags::HASH_BASED)
    }

    pub fn source_hash(&self) -> Option<u64> {
        self.is_hash_based()
            .then(|| u64::from(self.hash_or_time) | (u64::from(self.size) << 32))
    }

    pub fn mtime(&self) -> Option<u32> {
        (!self.is_hash_based()).then_some(self.hash_or_time)
    }

    pub fn source_size(&self) -> Option<u32> {
        (!self.is_hash_based()).then_some(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let bytes = encode_header(PythonVersion::Py3_12.magic(), 0, 0x6543_2100, 42);
        assert_eq!(bytes.len(), HEADER_SIZE);
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.magic, PythonVersion::Py3_12.magic());
        assert_eq!(header.hash_or_time, 0x6543_2100);
        assert_eq!(header.size, 42);
        assert_eq!(header.to_bytes(), bytes);
    }

    #[test]
    fn fields_are_little_endian() {
        let bytes = encode_header([1, 2, 3, 4], 0x0102_0304, 5, 6);
        assert_eq!(&bytes[4..8], &[4, 3, 2, 1]);
        assert_eq!(&bytes[8..12], &[5, 0, 0, 0]);
    }

    #[test]
    fn short_header_rejected() {
        for len in 0..HEADER_SIZE {
            let bytes = vec![0u8; len];
            assert!(matches!(
                decode_header(&bytes),
                Err(FormatError::MalformedHeader { found }) if found == len
            ));
        }
    }

    #[test]
    fn unknown_magic_is_unsupported() {
        let header = decode_header(&encode_header(*b"TRC\0", 0, 0, 0)).unwrap();
        assert!(matches!(
            header.version(),
            Err(FormatError::UnsupportedFormat { magic }) if &magic == b"TRC\0"
        ));
    }

    #[test]
    fn zero_magic_is_unversioned() {
        let header = decode_header(&[0u8; HEADER_SIZE]).unwrap();
        assert_eq!(header.version().unwrap(), PythonVersion::Unversioned);
    }

    #[test]
    fn hash_based_header() {
        let header = PycHeader::hashed(PythonVersion::Py3_12, 0x1122_3344_5566_7788, true);
        assert!(header.flags.has(HeaderFlags::CHECK_SOURCE));
        assert_eq!(header.source_hash(), Some(0x1122_3344_5566_7788));
        assert_eq!(header.mtime(), None);
        let decoded = decode_header(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn timestamped_header() {
        let header = PycHeader::timestamped(PythonVersion::Py3_10, 1_700_000_000, 12);
        assert_eq!(header.mtime(), Some(1_700_000_000));
        assert_eq!(header.source_size(), Some(12));
        assert_eq!(header.source_hash(), None);
    }

    #[test]
    fn unknown_flag_bits_preserved() {
        let bytes = encode_header(PythonVersion::Py3_12.magic(), 0x8000_0004, 0, 0);
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.flags.bits(), 0x8000_0004);
        assert_eq!(header.to_bytes(), bytes);
    }
}
