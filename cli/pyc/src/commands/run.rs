//! `pyc run`: validate a container and hand it to the host interpreter.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use pyc_format::validate;

/// How to start the host interpreter.
#[derive(Debug, Clone)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

/// Decode and validate `path`, then execute it unless `check_only` is set.
/// Any failure, including a non-zero interpreter exit, is an error.
pub fn run(path: &Path, interpreter: &Interpreter, check_only: bool) -> Result<()> {
    let file = super::load(path)?;
    let version = file.version()?;
    let units = validate(&file.objects)
        .with_context(|| format!("validating {}", path.display()))?;
    info!(%version, code_objects = units, "container is valid");

    if check_only {
        println!("{}: ok (Python {version}, {units} code objects)", path.display());
        return Ok(());
    }
    if !version.is_versioned() {
        warn!("unversioned container; the interpreter will most likely reject it");
    }

    debug!(program = %interpreter.program, args = ?interpreter.args, "starting interpreter");
    let status = Command::new(&interpreter.program)
        .args(&interpreter.args)
        .arg(path)
        .status()
        .with_context(|| format!("starting {}", interpreter.program))?;
    if !status.success() {
        bail!("{} exited with {status}", interpreter.program);
    }
    Ok(())
}
