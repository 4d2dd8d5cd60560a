//! Subscriber setup: console logs on stderr (stdout carries readings), plus an
//! optional JSON file sink from `[logging]`.

use std::path::Path;

use bascula_config::Logging;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::cli::FILE_GUARD;

/// Level precedence: `--log-level`, then `RUST_LOG`, then `[logging] level`,
/// then `info`.
fn filter(cli_level: Option<&str>, cfg: &Logging) -> eyre::Result<EnvFilter> {
    if let Some(level) = cli_level {
        return EnvFilter::try_new(level)
            .map_err(|e| eyre::eyre!("invalid --log-level {level:?}: {e}"));
    }
    if let Ok(env) = EnvFilter::try_from_default_env() {
        return Ok(env);
    }
    let level = cfg.level.as_deref().unwrap_or("info");
    EnvFilter::try_new(level).map_err(|e| eyre::eyre!("invalid logging.level {level:?}: {e}"))
}

fn file_writer(path: &str, rotation: Option<&str>) -> NonBlocking {
    let path = Path::new(path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map_or_else(|| "bascula.log".into(), |n| n.to_string_lossy().into_owned());
    let appender = match rotation {
        Some("daily") => tracing_appender::rolling::daily(dir, prefix),
        Some("hourly") => tracing_appender::rolling::hourly(dir, prefix),
        _ => tracing_appender::rolling::never(dir, prefix),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // Dropping the guard would lose buffered lines at exit.
    let _ = FILE_GUARD.set(guard);
    writer
}

pub fn init(json: bool, cli_level: Option<&str>, cfg: &Logging) -> eyre::Result<()> {
    let filter = filter(cli_level, cfg)?;

    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .boxed()
    };

    let file = cfg.file.as_deref().map(|path| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(file_writer(path, cfg.rotation.as_deref()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| eyre::eyre!("install log subscriber: {e}"))
}
