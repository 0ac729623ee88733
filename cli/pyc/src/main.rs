//! pyc CLI: inspect, disassemble, assemble and run compiled Python containers.

mod commands;
mod config;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::build::BuildOptions;
use commands::run::Interpreter;
use config::PycConfig;
use pyc_core::PythonVersion;

#[derive(Parser)]
#[command(name = "pyc", version, about = "Compiled Python container toolkit")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides otherwise)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a container and execute it with the host interpreter
    Run {
        /// Container file
        file: PathBuf,
        /// Decode and validate only, do not execute
        #[arg(long)]
        check: bool,
        /// Interpreter to execute with (default: [run] interpreter or python3)
        #[arg(long)]
        interpreter: Option<String>,
    },
    /// Show header fields and object statistics
    Inspect {
        /// Container file
        file: PathBuf,
        /// Output format (text, json)
        #[arg(long)]
        export: Option<String>,
    },
    /// Disassemble every code object in a container
    Disasm {
        /// Container file
        file: PathBuf,
        /// Exported opcode table (JSON), needed for releases without a built-in table
        #[arg(long)]
        opcodes: Option<PathBuf>,
    },
    /// Assemble a module that prints the given strings
    Build {
        /// Output container path
        output: PathBuf,
        /// String to print; repeat for several statements
        #[arg(long = "print", value_name = "TEXT", required = true)]
        texts: Vec<String>,
        /// Target release (default: [build] version or 3.12)
        #[arg(long)]
        version: Option<PythonVersion>,
        /// Exported opcode table (JSON)
        #[arg(long)]
        opcodes: Option<PathBuf>,
        /// co_filename of the module (default: [build] filename or <pyc>)
        #[arg(long)]
        filename: Option<String>,
        /// Write a hash-based header instead of a timestamp
        #[arg(long)]
        hash_based: bool,
    },
    /// Export an opcode table as JSON
    Opcodes {
        /// Release to export (default: 3.12)
        #[arg(long)]
        version: Option<PythonVersion>,
        /// Re-export a table loaded from this JSON file
        #[arg(long)]
        from: Option<PathBuf>,
        /// Output path
        #[arg(long, default_value = "opcode_map.json")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    let (config, config_dir) = load_config(&cwd)?;

    match cli.command {
        Commands::Run {
            file,
            check,
            interpreter,
        } => {
            let interpreter = Interpreter {
                program: interpreter.unwrap_or_else(|| config.run.interpreter.clone()),
                args: config.run.args.clone(),
            };
            commands::run::run(&file, &interpreter, check)
        }
        Commands::Inspect { file, export } => commands::inspect::run(&file, export.as_deref()),
        Commands::Disasm { file, opcodes } => {
            let opcodes = opcodes.or_else(|| config.opcode_table(&config_dir));
            commands::disasm::run(&file, opcodes.as_deref())
        }
        Commands::Build {
            output,
            texts,
            version,
            opcodes,
            filename,
            hash_based,
        } => {
            let version = match version {
                Some(v) => v,
                None => config.build_version()?.unwrap_or(PythonVersion::Py3_12),
            };
            let opcodes = opcodes.or_else(|| config.opcode_table(&config_dir));
            let filename = filename
                .or_else(|| config.build.filename.clone())
                .unwrap_or_else(|| "<pyc>".to_string());
            let options = BuildOptions {
                version,
                opcodes: opcodes.as_deref(),
                filename: &filename,
                hash_based: hash_based || config.build.hash_based,
            };
            commands::build::run(&output, &texts, &options)
        }
        Commands::Opcodes {
            version,
            from,
            output,
        } => {
            let version = version.unwrap_or(PythonVersion::Py3_12);
            commands::opcodes::run(version, from.as_deref(), &output)
        }
    }
}

/// Settings from the nearest `pyc.toml`, or defaults rooted at `cwd`.
fn load_config(cwd: &Path) -> anyhow::Result<(PycConfig, PathBuf)> {
    match PycConfig::find_and_load(cwd)? {
        Some((config, dir)) => Ok((config, dir)),
        None => Ok((PycConfig::default(), cwd.to_path_buf())),
    }
}
