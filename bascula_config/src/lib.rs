#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and endpoint resolution for the scale link.
//!
//! - `Config` and its sections are deserialized from TOML; every section has
//!   defaults so an empty file is a valid config.
//! - `validate()` rejects values the link cannot run with.
//! - `endpoints()` resolves the backend and stream URLs from the config, then
//!   the environment, then built-in defaults.
use bascula_traits::endpoints::{STREAM_PATH, join};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_PORT: u16 = 8081;

/// Full backend URL override, e.g. `http://pi:8081`.
pub const ENV_BACKEND_BASE_URL: &str = "BACKEND_BASE_URL";
pub const ENV_BACKEND_HOST: &str = "BASCULA_BACKEND_HOST";
pub const ENV_BACKEND_PORT: &str = "BASCULA_BACKEND_PORT";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Backend {
    /// HTTP base URL of the backend. Falls back to the environment when absent.
    pub base_url: Option<String>,
    /// WebSocket base URL. Derived from `base_url` when absent.
    pub stream_url: Option<String>,
    /// Per-request timeout enforced by the HTTP client (ms).
    pub request_timeout_ms: u64,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            base_url: None,
            stream_url: None,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Polling {
    /// Weight read cycle period (ms)
    pub read_ms: u64,
    /// Device status cycle period (ms)
    pub status_ms: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            read_ms: 300,
            status_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Reconnect {
    pub initial_ms: u64,
    pub max_ms: u64,
    /// Upper bound (exclusive) of the random delay added to every backoff.
    pub jitter_ms: u64,
    /// Failed reconnects tolerated before polling becomes permanent.
    pub max_attempts: u32,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
            jitter_ms: 1_000,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Stability {
    /// Samples required before a verdict is computed
    pub window: usize,
    /// Minimum span between oldest and newest sample (ms)
    pub min_stable_ms: u64,
    /// Max-min spread below which the reading counts as settled (g)
    pub eps_grams: f64,
}

impl Default for Stability {
    fn default() -> Self {
        Self {
            window: 12,
            min_stable_ms: 1_500,
            eps_grams: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnitCfg {
    #[default]
    G,
    Ml,
}

/// Fixed synthetic reading used when no hardware is around.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Demo {
    pub enabled: bool,
    pub weight_g: f64,
    pub unit: UnitCfg,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub polling: Polling,
    pub reconnect: Reconnect,
    pub stability: Stability,
    pub demo: Demo,
    pub logging: Logging,
}

/// Resolved URLs the link connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// HTTP base, without trailing slash
    pub base_url: String,
    /// Full WebSocket URL including the stream path
    pub stream_url: String,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))
}

/// Backend base URL: explicit value, then `BACKEND_BASE_URL`, then
/// `BASCULA_BACKEND_HOST`/`BASCULA_BACKEND_PORT`, then `http://127.0.0.1:8081`.
///
/// An unparsable port falls back to the default port.
pub fn resolve_backend_base_url<F>(explicit: Option<&str>, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    if let Some(url) = env(ENV_BACKEND_BASE_URL).filter(|s| !s.trim().is_empty()) {
        return url.trim().trim_end_matches('/').to_string();
    }
    let host = env(ENV_BACKEND_HOST)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BACKEND_HOST.to_string());
    let port = env(ENV_BACKEND_PORT)
        .and_then(|p| p.trim().parse::<u16>().ok())
        .unwrap_or(DEFAULT_BACKEND_PORT);
    format!("http://{}:{}", host.trim(), port)
}

/// Map an HTTP(S) base URL onto the matching WebSocket scheme and append the
/// stream path.
pub fn derive_stream_url(base_url: &str) -> eyre::Result<String> {
    let parsed =
        Url::parse(base_url).map_err(|e| eyre::eyre!("invalid backend url {base_url:?}: {e}"))?;
    let scheme = match parsed.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => eyre::bail!("backend url must use http or https, got {other:?}"),
    };
    let rest = &base_url.trim_end_matches('/')[parsed.scheme().len()..];
    Ok(join(&format!("{scheme}{rest}"), STREAM_PATH))
}

fn check_scheme(label: &str, raw: &str, allowed: &[&str]) -> eyre::Result<()> {
    let url = Url::parse(raw).map_err(|e| eyre::eyre!("{label} is not a valid url: {e}"))?;
    if !allowed.contains(&url.scheme()) {
        eyre::bail!(
            "{label} must use one of [{}], got {:?}",
            allowed.join(", "),
            url.scheme()
        );
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Backend
        if let Some(url) = &self.backend.base_url {
            check_scheme("backend.base_url", url, &["http", "https"])?;
        }
        if let Some(url) = &self.backend.stream_url {
            check_scheme("backend.stream_url", url, &["ws", "wss"])?;
        }
        if self.backend.request_timeout_ms == 0 {
            eyre::bail!("backend.request_timeout_ms must be >= 1");
        }

        // Polling
        if self.polling.read_ms == 0 {
            eyre::bail!("polling.read_ms must be > 0");
        }
        if self.polling.status_ms == 0 {
            eyre::bail!("polling.status_ms must be > 0");
        }

        // Reconnect
        if self.reconnect.initial_ms == 0 {
            eyre::bail!("reconnect.initial_ms must be > 0");
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            eyre::bail!("reconnect.max_ms must be >= reconnect.initial_ms");
        }
        if self.reconnect.max_ms > 60 * 60 * 1000 {
            eyre::bail!("reconnect.max_ms is unreasonably large (>1h)");
        }
        if self.reconnect.max_attempts == 0 {
            eyre::bail!("reconnect.max_attempts must be >= 1");
        }

        // Stability
        if self.stability.window < 2 {
            eyre::bail!("stability.window must be >= 2");
        }
        if self.stability.window > 1_000 {
            eyre::bail!("stability.window is unreasonably large (>1000)");
        }
        if !(self.stability.eps_grams.is_finite() && self.stability.eps_grams > 0.0) {
            eyre::bail!("stability.eps_grams must be a positive number");
        }
        if self.stability.min_stable_ms > 5 * 60 * 1000 {
            eyre::bail!("stability.min_stable_ms is unreasonably large (>5min)");
        }

        // Demo
        if !self.demo.weight_g.is_finite() {
            eyre::bail!("demo.weight_g must be finite");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }

    /// Resolve URLs using the process environment.
    pub fn endpoints(&self) -> eyre::Result<Endpoints> {
        self.endpoints_with(|key| std::env::var(key).ok())
    }

    /// Resolve URLs with an injected environment lookup.
    pub fn endpoints_with<F>(&self, env: F) -> eyre::Result<Endpoints>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = resolve_backend_base_url(self.backend.base_url.as_deref(), env);
        let stream_url = match self.backend.stream_url.as_deref() {
            Some(ws) => join(ws, STREAM_PATH),
            None => derive_stream_url(&base_url)?,
        };
        Ok(Endpoints {
            base_url,
            stream_url,
        })
    }
}
