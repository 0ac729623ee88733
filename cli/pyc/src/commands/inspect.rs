//! `pyc inspect`: header fields, object statistics and JSON export.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::json;

use pyc_core::hash::hash_hex;
use pyc_format::{PycFile, HEADER_SIZE};

/// Print a summary of `path`, or the whole graph when `export` is `json`.
pub fn run(path: &Path, export: Option<&str>) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let file = PycFile::from_bytes(&bytes).with_context(|| format!("parsing {}", path.display()))?;

    match export.unwrap_or("text") {
        "text" => print!("{}", summary(path, &bytes, &file)?),
        "json" => println!("{}", serde_json::to_string_pretty(&export_json(&bytes, &file)?)?),
        other => bail!("unknown export format '{other}' (expected text or json)"),
    }
    Ok(())
}

fn kind_counts(file: &PycFile) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for id in file.objects.reachable() {
        if let Some(object) = file.objects.get(id) {
            *counts.entry(object.kind()).or_insert(0) += 1;
        }
    }
    counts
}

fn shared_count(file: &PycFile) -> usize {
    file.objects.reference_counts().iter().filter(|&&n| n > 1).count()
}

fn summary(path: &Path, bytes: &[u8], file: &PycFile) -> Result<String> {
    let header = &file.header;
    let version = file.version()?;
    let payload = &bytes[HEADER_SIZE..];
    let mut out = String::new();

    writeln!(out, "File:         {}", path.display())?;
    writeln!(out, "Magic:        {:02x?} (Python {version})", header.magic)?;
    writeln!(out, "Flags:        {:#x}", header.flags.bits())?;
    match header.source_hash() {
        Some(hash) => writeln!(out, "Source hash:  {hash:016x}")?,
        None => {
            writeln!(out, "Source mtime: {}", header.hash_or_time)?;
            writeln!(out, "Source size:  {}", header.size)?;
        }
    }
    writeln!(out, "Payload:      {} bytes, sha256 {}", payload.len(), hash_hex(payload))?;
    writeln!(
        out,
        "Objects:      {} ({} shared)",
        file.objects.reachable().len(),
        shared_count(file)
    )?;
    for (kind, count) in kind_counts(file) {
        writeln!(out, "  {kind:<12}{count}")?;
    }
    Ok(out)
}

fn export_json(bytes: &[u8], file: &PycFile) -> Result<serde_json::Value> {
    let header = &file.header;
    let payload = &bytes[HEADER_SIZE..];
    Ok(json!({
        "version": file.version()?.to_string(),
        "header": {
            "magic": header.magic,
            "flags": header.flags.bits(),
            "hash_based": header.is_hash_based(),
            "source_hash": header.source_hash(),
            "source_mtime": header.mtime(),
            "source_size": header.source_size(),
        },
        "payload": {
            "length": payload.len(),
            "sha256": hash_hex(payload),
        },
        "kinds": kind_counts(file),
        "objects": serde_json::to_value(&file.objects)?,
    }))
}
