//! Command implementations. Data goes to stdout; logs and errors to stderr.

use std::sync::Arc;
use std::time::Duration;

use bascula_config::{Config, Endpoints};
use bascula_core::commands;
use bascula_core::error::LinkError;
use bascula_core::wire::{ReadOutcome, StatusOutcome};
use bascula_core::{LinkCfg, ScaleLink, WeightReading};
use bascula_http::{HttpScaleApi, SimulatedBackend, WsConnector};
use bascula_traits::endpoints::READ_PATH;
use bascula_traits::{ScaleApi, StreamConnector};
use eyre::WrapErr;
use serde_json::json;

use crate::cli::{Cli, Commands};
use crate::error_fmt::CONFIG_CONTEXT;

/// Effective settings for one invocation.
pub struct Session {
    pub cfg: Config,
    pub endpoints: Endpoints,
    pub json: bool,
    sim: Option<f64>,
}

impl Session {
    /// Load, override, validate and resolve.
    pub fn from_cli(cli: &Cli) -> eyre::Result<Self> {
        let mut cfg = match &cli.config {
            Some(path) => bascula_config::load_file(path).wrap_err(CONFIG_CONTEXT)?,
            None => Config::default(),
        };
        if let Some(url) = &cli.backend_url {
            cfg.backend.base_url = Some(url.clone());
        }
        if cli.demo {
            cfg.demo.enabled = true;
        }
        cfg.validate().wrap_err(CONFIG_CONTEXT)?;
        let endpoints = cfg.endpoints().wrap_err(CONFIG_CONTEXT)?;
        Ok(Self {
            cfg,
            endpoints,
            json: cli.json,
            sim: cli.sim.then_some(cli.sim_load_g),
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.backend.request_timeout_ms)
    }

    fn transports(&self) -> eyre::Result<(Arc<dyn ScaleApi>, Arc<dyn StreamConnector>)> {
        if let Some(load) = self.sim {
            let sim = Arc::new(SimulatedBackend::new());
            sim.place(load);
            tracing::info!(load_g = load, "using simulated backend");
            return Ok((sim.clone(), sim));
        }
        let api = HttpScaleApi::new(self.endpoints.base_url.clone(), self.timeout())?;
        Ok((Arc::new(api), Arc::new(WsConnector::new(self.timeout()))))
    }

    fn emit(&self, value: &serde_json::Value, pretty: impl FnOnce() -> String) {
        if self.json {
            println!("{value}");
        } else {
            println!("{}", pretty());
        }
    }
}

pub async fn run(cli: Cli) -> eyre::Result<()> {
    let session = Session::from_cli(&cli)?;
    match cli.cmd {
        Commands::Watch { duration_ms } => {
            watch(&session, duration_ms.map(Duration::from_millis)).await
        }
        Commands::Read => read(&session).await,
        Commands::Status => status(&session).await,
        Commands::Tare => tare(&session).await,
        Commands::Calibrate { known_grams } => calibrate(&session, known_grams).await,
        Commands::Health => health(&session).await,
        Commands::SelfCheck => {
            self_check(&session);
            Ok(())
        }
    }
}

fn reading_line(r: &WeightReading) -> String {
    let mut line = format!(
        "{:>9.2} {:<2}  {:<8}  {}",
        r.weight,
        r.unit.as_str(),
        if r.stable { "stable" } else { "settling" },
        r.state,
    );
    if r.reconnect_attempts > 0 {
        line.push_str(&format!("  attempt {}", r.reconnect_attempts));
    }
    if let Some(e) = &r.error {
        line.push_str(&format!("  ({e})"));
    }
    line
}

fn emit_reading(session: &Session, r: &WeightReading) -> eyre::Result<()> {
    let value = serde_json::to_value(r)?;
    session.emit(&value, || reading_line(r));
    Ok(())
}

async fn watch(session: &Session, duration: Option<Duration>) -> eyre::Result<()> {
    let cfg = LinkCfg::from_config(&session.cfg, &session.endpoints);
    let builder = ScaleLink::builder().with_config(cfg);
    let mut link = if session.cfg.demo.enabled {
        builder.try_start()?
    } else {
        let (api, connector) = session.transports()?;
        builder.with_api(api).with_connector(connector).start()?
    };

    let mut rx = link.subscribe();
    let first = rx.borrow_and_update().clone();
    emit_reading(session, &first)?;

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let result = loop {
        tokio::select! {
            _ = &mut deadline => break Ok(()),
            _ = &mut interrupt => {
                tracing::info!("interrupted");
                break Ok(());
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let r = rx.borrow_and_update().clone();
                if let Err(e) = emit_reading(session, &r) {
                    break Err(e);
                }
            }
        }
    };
    link.stop().await;
    result
}

async fn read(session: &Session) -> eyre::Result<()> {
    let (api, _) = session.transports()?;
    match commands::read_once(api.as_ref(), session.timeout()).await {
        ReadOutcome::Reading(update) => {
            let weight = update.weight.unwrap_or(0.0);
            let unit = update.unit.unwrap_or_default();
            session.emit(
                &json!({ "weight": weight, "unit": unit, "stable": update.stable }),
                || match update.stable {
                    Some(true) => format!("{weight:.2} {unit} (stable)"),
                    Some(false) => format!("{weight:.2} {unit} (settling)"),
                    None => format!("{weight:.2} {unit}"),
                },
            );
            Ok(())
        }
        ReadOutcome::Rejected { reason } => Err(LinkError::Rejected(reason).into()),
        ReadOutcome::EndpointMissing => Err(LinkError::NotFound(READ_PATH.to_string()).into()),
        ReadOutcome::Failed(e) => Err(e.into()),
        ReadOutcome::Malformed(detail) => Err(LinkError::Protocol(detail).into()),
    }
}

async fn status(session: &Session) -> eyre::Result<()> {
    let (api, _) = session.transports()?;
    match commands::status_once(api.as_ref(), session.timeout()).await {
        StatusOutcome::Online => {
            session.emit(&json!({ "online": true }), || "scale online".to_string());
            Ok(())
        }
        StatusOutcome::Offline { reason } => {
            let text = match &reason {
                Some(r) => format!("scale offline: {r}"),
                None => "scale offline".to_string(),
            };
            session.emit(&json!({ "online": false, "reason": reason }), || text);
            Ok(())
        }
        StatusOutcome::Failed(e) => Err(e.into()),
        StatusOutcome::Malformed(detail) => Err(LinkError::Protocol(detail).into()),
    }
}

async fn tare(session: &Session) -> eyre::Result<()> {
    let (api, _) = session.transports()?;
    let ack = commands::tare(api.as_ref(), session.timeout()).await?;
    session.emit(&json!({ "ok": true, "message": ack.message }), || {
        ack.message.clone().unwrap_or_else(|| "tared".to_string())
    });
    Ok(())
}

async fn calibrate(session: &Session, known_grams: f64) -> eyre::Result<()> {
    let (api, _) = session.transports()?;
    let ack = commands::calibrate(api.as_ref(), known_grams, session.timeout()).await?;
    session.emit(
        &json!({ "ok": true, "known_grams": known_grams, "message": ack.message }),
        || {
            ack.message
                .clone()
                .unwrap_or_else(|| format!("calibrated against {known_grams} g"))
        },
    );
    Ok(())
}

async fn health(session: &Session) -> eyre::Result<()> {
    let (api, _) = session.transports()?;
    let h = commands::health(api.as_ref(), session.timeout()).await?;
    session.emit(&serde_json::to_value(&h)?, || {
        format!(
            "backend {}, scale {}",
            h.status,
            if h.scale_connected { "connected" } else { "disconnected" }
        )
    });
    Ok(())
}

fn self_check(session: &Session) {
    let demo = session.cfg.demo.enabled;
    session.emit(
        &json!({
            "ok": true,
            "base_url": session.endpoints.base_url,
            "stream_url": session.endpoints.stream_url,
            "demo": demo,
        }),
        || {
            format!(
                "config ok\nbackend: {}\nstream:  {}\ndemo:    {}",
                session.endpoints.base_url, session.endpoints.stream_url, demo
            )
        },
    );
}
