//! `pyc.toml` configuration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use pyc_core::PythonVersion;

pub const CONFIG_FILE: &str = "pyc.toml";

/// Project settings. Every section is optional; command-line flags win over
/// anything set here.
#[derive(Debug, Default, Deserialize)]
pub struct PycConfig {
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub opcodes: OpcodesSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct BuildSection {
    /// Target release, e.g. "3.12".
    pub version: Option<String>,
    /// `co_filename` of built modules.
    pub filename: Option<String>,
    #[serde(default)]
    pub hash_based: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Passed to the interpreter before the container path.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct OpcodesSection {
    /// Exported opcode table, relative to the directory holding `pyc.toml`.
    pub table: Option<PathBuf>,
}

impl PycConfig {
    /// Search for `pyc.toml` starting at `start_dir` and walking up.
    /// Returns the config and the directory it was found in.
    pub fn find_and_load(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                let content = fs::read_to_string(&candidate)
                    .with_context(|| format!("reading {}", candidate.display()))?;
                let config: PycConfig = toml::from_str(&content)
                    .with_context(|| format!("parsing {}", candidate.display()))?;
                return Ok(Some((config, dir)));
            }
            if !dir.pop() {
                return Ok(None);
            }
        }
    }

    /// The configured build release, if any.
    pub fn build_version(&self) -> Result<Option<PythonVersion>> {
        self.build
            .version
            .as_deref()
            .map(|v| v.parse::<PythonVersion>().with_context(|| format!("[build] version = {v:?}")))
            .transpose()
    }

    /// The configured opcode table, resolved against `config_dir`.
    pub fn opcode_table(&self, config_dir: &Path) -> Option<PathBuf> {
        self.opcodes.table.as_ref().map(|p| config_dir.join(p))
    }

    #[cfg(test)]
    pub fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
