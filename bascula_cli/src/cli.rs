//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "bascula", version, about = "Live weight from a kitchen scale backend")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Backend base URL, e.g. http://127.0.0.1:8081 (overrides config and environment)
    #[arg(long = "backend-url", value_name = "URL")]
    pub backend_url: Option<String>,

    /// Print JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG applies when omitted
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Publish the configured demo reading instead of connecting
    #[arg(long, action = ArgAction::SetTrue)]
    pub demo: bool,

    /// Talk to an in-process simulated scale instead of the network
    #[arg(long, action = ArgAction::SetTrue)]
    pub sim: bool,

    /// Load placed on the simulated scale (grams)
    #[arg(long = "sim-load-g", value_name = "GRAMS", default_value_t = 125.0)]
    pub sim_load_g: f64,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow the live reading until Ctrl-C
    Watch {
        /// Stop after this many milliseconds
        #[arg(long = "duration-ms", value_name = "MS")]
        duration_ms: Option<u64>,
    },
    /// Read the weight once
    Read,
    /// Ask whether the scale device is online
    Status,
    /// Zero the scale with whatever is on the pan
    Tare,
    /// Calibrate against a reference load on the pan
    Calibrate {
        /// Weight of the reference load in grams
        #[arg(long = "known-grams", value_name = "GRAMS")]
        known_grams: f64,
    },
    /// Backend health probe
    Health,
    /// Validate config and print resolved endpoints without connecting
    SelfCheck,
}
