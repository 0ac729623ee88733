//! `pyc opcodes`: export an opcode table as a flat JSON document.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use pyc_core::PythonVersion;

/// Write the table for `version` (or the table loaded from `source`) to
/// `output`, mnemonic → value, keys sorted.
pub fn run(version: PythonVersion, source: Option<&Path>, output: &Path) -> Result<()> {
    let table = super::load_table(version, source)?;
    let mut json = table.to_json_pretty()?;
    json.push('\n');
    fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;
    println!(
        "wrote {} opcodes for Python {version} to {}",
        table.len(),
        output.display()
    );
    Ok(())
}
