//! `pyc disasm`: instruction listing for every code object.

use std::path::Path;

use anyhow::{Context, Result};

use pyc_core::disasm::disassemble;

pub fn run(path: &Path, opcodes: Option<&Path>) -> Result<()> {
    print!("{}", listing(path, opcodes)?);
    Ok(())
}

fn listing(path: &Path, opcodes: Option<&Path>) -> Result<String> {
    let file = super::load(path)?;
    let version = file.version()?;
    let table = super::load_table(version, opcodes)?;
    disassemble(&file.objects, version, &table)
        .with_context(|| format!("disassembling {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyc_core::{OpcodeTable, ProgramBuilder, PythonVersion};
    use pyc_format::{PycFile, PycHeader};

    fn write(dir: &Path, version: PythonVersion) -> std::path::PathBuf {
        let table = OpcodeTable::builtin(version).unwrap();
        let mut builder = ProgramBuilder::new(version, table).unwrap();
        builder.print_str("listed").unwrap();
        let file = PycFile::new(
            PycHeader::timestamped(version, 0, 0),
            builder.build("<string>", "<module>").unwrap(),
        );
        let path = dir.join("listed.pyc");
        file.write_path(&path).unwrap();
        path
    }

    #[test]
    fn lists_builtin_versions() {
        let dir = tempfile::tempdir().unwrap();
        let text = listing(&write(dir.path(), PythonVersion::Py3_12), None).unwrap();
        assert!(text.contains("LOAD_CONST"));
        assert!(text.contains("\"listed\""));
        assert!(!text.contains("CACHE"));
    }

    #[test]
    fn exported_table_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), PythonVersion::Py3_10);
        let table = dir.path().join("opcode_map.json");
        std::fs::write(
            &table,
            OpcodeTable::builtin(PythonVersion::Py3_10).unwrap().to_json_pretty().unwrap(),
        )
        .unwrap();
        let text = listing(&path, Some(&table)).unwrap();
        assert!(text.contains("CALL_FUNCTION"));
    }
}
