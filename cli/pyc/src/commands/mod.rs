//! Command implementations, one module per subcommand.

pub mod build;
pub mod disasm;
pub mod inspect;
pub mod opcodes;
pub mod run;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use pyc_core::{OpcodeTable, PythonVersion};
use pyc_format::PycFile;

/// Read and decode a container.
pub(crate) fn load(path: &Path) -> Result<PycFile> {
    PycFile::read_path(path).with_context(|| format!("reading {}", path.display()))
}

/// The opcode table for `version`: an exported JSON table when one is given,
/// otherwise the built-in one.
pub(crate) fn load_table(version: PythonVersion, exported: Option<&Path>) -> Result<OpcodeTable> {
    match exported {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading opcode table {}", path.display()))?;
            let table = OpcodeTable::from_json(&json)
                .with_context(|| format!("parsing opcode table {}", path.display()))?;
            Ok(table.with_cache_layout(version))
        }
        None => OpcodeTable::builtin(version).with_context(|| {
            format!("no built-in opcode table for Python {version}; pass --opcodes <table.json>")
        }),
    }
}
