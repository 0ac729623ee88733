//! `pyc build`: assemble a module that prints the given strings.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::debug;

use pyc_core::hash::source_hash;
use pyc_core::{ProgramBuilder, PythonVersion};
use pyc_format::{validate, PycFile, PycHeader};

/// Settings after merging flags with `pyc.toml`.
#[derive(Debug, Clone)]
pub struct BuildOptions<'a> {
    pub version: PythonVersion,
    pub opcodes: Option<&'a Path>,
    pub filename: &'a str,
    pub hash_based: bool,
}

pub fn run(output: &Path, texts: &[String], options: &BuildOptions<'_>) -> Result<()> {
    let file = assemble(texts, options)?;
    file.write_path(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "wrote {} (Python {}, {} statements)",
        output.display(),
        options.version,
        texts.len()
    );
    Ok(())
}

/// The source the module stands for, used for the header's size or hash.
fn source_text(texts: &[String]) -> String {
    texts.iter().map(|t| format!("print({t:?})\n")).collect()
}

/// The header stores the source size in 32 bits.
fn source_size(len: usize) -> Result<u32> {
    u32::try_from(len).with_context(|| format!("source size {len} does not fit the header"))
}

fn assemble(texts: &[String], options: &BuildOptions<'_>) -> Result<PycFile> {
    let version = options.version;
    let table = super::load_table(version, options.opcodes)?;
    let mut builder = ProgramBuilder::new(version, table)?;
    for text in texts {
        builder.print_str(text)?;
    }
    let objects = builder.build(options.filename, "<module>")?;
    validate(&objects).context("assembled module failed validation")?;

    let source = source_text(texts);
    let header = if options.hash_based {
        PycHeader::hashed(version, source_hash(source.as_bytes()), false)
    } else {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        PycHeader::timestamped(version, mtime, source_size(source.len())?)
    };
    debug!(%version, objects = objects.len(), "assembled module");
    Ok(PycFile::new(header, objects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyc_core::Object;

    fn options(version: PythonVersion) -> BuildOptions<'static> {
        BuildOptions {
            version,
            opcodes: None,
            filename: "<pyc>",
            hash_based: false,
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn build_writes_a_loadable_container() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("hello.pyc");
        run(&output, &texts(&["Hello", "world"]), &options(PythonVersion::Py3_12)).unwrap();

        let file = PycFile::read_path(&output).unwrap();
        assert_eq!(file.version().unwrap(), PythonVersion::Py3_12);
        assert_eq!(validate(&file.objects).unwrap(), 1);
        assert_eq!(file.header.source_size(), Some(source_text(&texts(&["Hello", "world"])).len() as u32));
        let strings: Vec<_> = file
            .objects
            .reachable()
            .into_iter()
            .filter_map(|id| file.objects[id].as_str().map(str::to_string))
            .collect();
        assert!(strings.iter().any(|s| s == "Hello"));
        assert!(strings.iter().any(|s| s == "world"));
    }

    #[test]
    fn hash_based_header_carries_source_hash() {
        let mut opts = options(PythonVersion::Py3_10);
        opts.hash_based = true;
        let file = assemble(&texts(&["x"]), &opts).unwrap();
        assert!(file.header.is_hash_based());
        assert_eq!(
            file.header.source_hash(),
            Some(source_hash(source_text(&texts(&["x"])).as_bytes()))
        );
    }

    #[test]
    fn filename_is_recorded() {
        let file = assemble(&texts(&["x"]), &options(PythonVersion::Py3_12)).unwrap();
        let root = file.objects.root().unwrap();
        let code = file.objects[root].as_code().unwrap();
        assert!(matches!(&file.objects[code.filename], Object::Str { text, .. } if text == "<pyc>"));
    }

    #[test]
    fn source_size_must_fit_header() {
        assert_eq!(source_size(28).unwrap(), 28);
        assert_eq!(source_size(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        {
            let err = source_size(u32::MAX as usize + 1).unwrap_err();
            assert!(err.to_string().contains("does not fit"));
        }
    }

    #[test]
    fn version_without_table_needs_opcodes() {
        let err = assemble(&texts(&["x"]), &options(PythonVersion::Py3_8)).unwrap_err();
        assert!(err.to_string().contains("--opcodes"));
    }
}
