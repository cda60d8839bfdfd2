//! Netlist compiler command line.
//!
//! # Usage
//!
//! ```bash
//! netlist amplifier.cir --project ./myproject --laplace-severity error
//! RUST_LOG=debug netlist amplifier.cir
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use netlist_core::{compile_file, CompilerConfig, CompilerContext, Result, Severity};
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LaplaceSeverity {
    Warning,
    Error,
}

impl From<LaplaceSeverity> for Severity {
    fn from(value: LaplaceSeverity) -> Self {
        match value {
            LaplaceSeverity::Warning => Severity::Warning,
            LaplaceSeverity::Error => Severity::Error,
        }
    }
}

/// Hierarchical netlist compiler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the netlist file
    #[arg(value_name = "FILE")]
    netlist: PathBuf,

    /// Project root that library references are resolved against
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// User library directory, relative to the project root
    #[arg(long, default_value = "lib")]
    lib_dir: PathBuf,

    /// Circuit directory, relative to the project root
    #[arg(long, default_value = "cir")]
    circuit_dir: PathBuf,

    /// Additional library compiled into the built-in cache
    #[arg(long = "builtin", value_name = "FILE")]
    builtin: Vec<PathBuf>,

    /// Severity of the Laplace variable in `.model` parameters that forbid it
    #[arg(long, value_enum, default_value_t = LaplaceSeverity::Warning)]
    laplace_severity: LaplaceSeverity,

    /// Maximum sub-circuit nesting depth
    #[arg(long, default_value_t = netlist_core::context::DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

fn run(args: Args) -> Result<bool> {
    let mut config = CompilerConfig::new()
        .with_project_root(args.project)
        .with_lib_dir(args.lib_dir)
        .with_circuit_dir(args.circuit_dir)
        .with_laplace_severity(args.laplace_severity.into())
        .with_max_depth(args.max_depth);
    for path in args.builtin {
        config = config.with_builtin_library(path);
    }

    let mut ctx = CompilerContext::new(config);
    let flat = compile_file(&mut ctx, &args.netlist)?;

    for diagnostic in ctx.diagnostics.items() {
        eprintln!("{}\n", diagnostic);
    }
    println!("{}", flat);
    Ok(flat.is_ok())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
