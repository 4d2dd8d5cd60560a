#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod app;
mod cli;
mod error_fmt;
mod logging;

use clap::Parser;

use crate::cli::{Cli, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Panics only; errors below are reported through humanize().
    let _ = color_eyre::install();

    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = start(cli).await {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        tracing::debug!(error = ?e, "command failed");
        std::process::exit(exit_code_for_error(&e));
    }
}

async fn start(cli: Cli) -> eyre::Result<()> {
    // Logging wants the config's [logging] section; a broken config is
    // reported by the command itself, with console defaults.
    let log_cfg = cli
        .config
        .as_deref()
        .and_then(|p| bascula_config::load_file(p).ok())
        .map(|c| c.logging)
        .unwrap_or_default();
    logging::init(cli.json, cli.log_level.as_deref(), &log_cfg)?;
    app::run(cli).await
}
