//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "lcflow", version, about = "LC flow converter calibration CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/lcflow.toml")]
    pub config: PathBuf,

    /// Optional persisted baselines CSV (strict header)
    #[arg(long, value_name = "FILE")]
    pub baselines: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Full initial calibration over the front-ends
    Calibrate {
        /// Write the resulting per-channel baselines to this CSV
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },
    /// Calibrate (or restore persisted baselines) and enter the steady-state
    /// rotation display loop with periodic drift re-calibration
    Run {
        /// Display cycles before exiting; 0 runs until Ctrl-C
        #[arg(long, value_name = "N", default_value_t = 0)]
        cycles: u64,
    },
    /// Quick health check (front-end responds, baselines readable)
    SelfCheck,
}
