//! The `.pyc` container: header plus marshalled payload.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::debug;

use pyc_core::{ObjectGraph, PythonVersion};

use crate::error::{FormatError, Result};
use crate::header::{decode_header, PycHeader, HEADER_SIZE};
use crate::marshal;

/// A compiled module: header metadata + object graph.
#[derive(Debug, Clone, PartialEq)]
pub struct PycFile {
    pub header: PycHeader,
    pub objects: ObjectGraph,
}

impl PycFile {
    pub fn new(header: PycHeader, objects: ObjectGraph) -> Self {
        Self { header, objects }
    }

    /// The release named by the header magic.
    pub fn version(&self) -> Result<PythonVersion> {
        self.header.version()
    }

    /// Serialize to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let layout = self.version()?.layout();
        let payload = marshal::encode(&self.objects, layout)?;
        writer.write_all(&self.header.to_bytes())?;
        writer.write_all(&payload)?;
        debug!(
            version = %self.version()?,
            payload = payload.len(),
            "wrote container"
        );
        Ok(())
    }

    /// Serialize to a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Deserialize from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Deserialize from a byte slice.
    ///
    /// An unversioned header with source size 0 and nothing after it stands
    /// for an empty module. Any other header needs a payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = decode_header(data)?;
        let version = header.version()?;
        let layout = version.layout();

        if data.len() == HEADER_SIZE && !version.is_versioned() && header.size == 0 {
            debug!("empty unversioned container");
            return Ok(Self {
                header,
                objects: ObjectGraph::empty_unit(layout),
            });
        }

        let objects = marshal::decode_at(data, HEADER_SIZE, layout)?;
        debug!(%version, objects = objects.len(), "read container");
        Ok(Self { header, objects })
    }

    /// Read a container from disk.
    pub fn read_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FormatError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => FormatError::Io(e),
        })?;
        Self::from_bytes(&data)
    }

    /// Write a container to disk, replacing any existing file.
    pub fn write_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyc_core::{Object, OpcodeTable, ProgramBuilder};

    use crate::header::encode_header;

    fn hello(version: PythonVersion) -> PycFile {
        let table = OpcodeTable::builtin(version).unwrap();
        let mut builder = ProgramBuilder::new(version, table).unwrap();
        builder.print_str("Hello, world").unwrap();
        let objects = builder.build("<string>", "<module>").unwrap();
        PycFile::new(PycHeader::timestamped(version, 0, 0), objects)
    }

    #[test]
    fn round_trip() {
        for version in [PythonVersion::Py3_10, PythonVersion::Py3_12] {
            let file = hello(version);
            let bytes = file.to_bytes().unwrap();
            assert_eq!(&bytes[..4], &version.magic());
            let loaded = PycFile::from_bytes(&bytes).unwrap();
            assert_eq!(loaded, file);
        }
    }

    #[test]
    fn empty_unversioned_container() {
        let bytes = encode_header([0; 4], 0, 0, 0);
        let file = PycFile::from_bytes(&bytes).unwrap();
        let root = file.objects.root().unwrap();
        let code = file.objects[root].as_code().unwrap();
        assert_eq!(file.objects[code.code].as_bytes(), Some(&[][..]));
        assert_eq!(file.objects[code.consts].as_tuple().map(<[_]>::len), Some(0));
    }

    #[test]
    fn versioned_header_needs_payload() {
        let bytes = encode_header(PythonVersion::Py3_12.magic(), 0, 0, 0);
        assert!(matches!(
            PycFile::from_bytes(&bytes),
            Err(FormatError::TruncatedInput { offset: 16, needed: 1, remaining: 0 })
        ));
    }

    #[test]
    fn unversioned_with_size_needs_payload() {
        let bytes = encode_header([0; 4], 0, 0, 10);
        assert!(matches!(
            PycFile::from_bytes(&bytes),
            Err(FormatError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn short_file_is_malformed_header() {
        assert!(matches!(
            PycFile::from_bytes(&[0x55, 0x0d]),
            Err(FormatError::MalformedHeader { found: 2 })
        ));
    }

    #[test]
    fn unknown_magic_is_unsupported() {
        let mut bytes = hello(PythonVersion::Py3_12).to_bytes().unwrap();
        bytes[0..4].copy_from_slice(b"TRC\0");
        assert!(matches!(
            PycFile::from_bytes(&bytes),
            Err(FormatError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn error_offsets_are_file_offsets() {
        let mut bytes = encode_header(PythonVersion::Py3_12.magic(), 0, 0, 0).to_vec();
        bytes.push(b'?');
        assert!(matches!(
            PycFile::from_bytes(&bytes),
            Err(FormatError::UnknownTag { tag: b'?', offset: 16 })
        ));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.pyc");
        assert!(matches!(
            PycFile::read_path(&path),
            Err(FormatError::FileNotFound { path: p }) if p == path
        ));
    }

    #[test]
    fn disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.pyc");
        let file = hello(PythonVersion::Py3_12);
        file.write_path(&path).unwrap();
        assert_eq!(PycFile::read_path(&path).unwrap(), file);
    }

    #[test]
    fn write_and_read_via_io() {
        let file = hello(PythonVersion::Py3_10);
        let mut buf = Vec::new();
        file.write_to(&mut buf).unwrap();
        let loaded = PycFile::read_from(&mut buf.as_slice()).unwrap();
        assert!(matches!(loaded.objects[loaded.objects.root().unwrap()], Object::Code(_)));
    }
}
