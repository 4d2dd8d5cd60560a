//! `From` implementations bridging `bascula_config` types to `bascula_core` types.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::coordinator::{CoordinatorCfg, DemoReading};
use crate::link::LinkCfg;
use crate::poller::PollingCfg;
use crate::reading::Unit;
use crate::stability::StabilityCfg;

impl From<bascula_config::UnitCfg> for Unit {
    fn from(u: bascula_config::UnitCfg) -> Self {
        match u {
            bascula_config::UnitCfg::G => Unit::G,
            bascula_config::UnitCfg::Ml => Unit::Ml,
        }
    }
}

impl From<&bascula_config::Reconnect> for BackoffPolicy {
    fn from(c: &bascula_config::Reconnect) -> Self {
        Self {
            initial: Duration::from_millis(c.initial_ms),
            max: Duration::from_millis(c.max_ms),
            jitter: Duration::from_millis(c.jitter_ms),
        }
    }
}

impl From<&bascula_config::Stability> for StabilityCfg {
    fn from(c: &bascula_config::Stability) -> Self {
        Self {
            window: c.window,
            min_stable_ms: c.min_stable_ms,
            eps_grams: c.eps_grams,
        }
    }
}

impl From<&bascula_config::Config> for PollingCfg {
    fn from(c: &bascula_config::Config) -> Self {
        Self {
            read_every: Duration::from_millis(c.polling.read_ms),
            status_every: Duration::from_millis(c.polling.status_ms),
            request_timeout: Duration::from_millis(c.backend.request_timeout_ms),
        }
    }
}

impl From<&bascula_config::Config> for CoordinatorCfg {
    fn from(c: &bascula_config::Config) -> Self {
        Self {
            backoff: (&c.reconnect).into(),
            max_attempts: c.reconnect.max_attempts,
            stability: (&c.stability).into(),
            demo: c.demo.enabled.then(|| DemoReading {
                weight: c.demo.weight_g,
                unit: c.demo.unit.into(),
            }),
        }
    }
}

impl LinkCfg {
    /// Link settings for a validated config and its resolved endpoints.
    pub fn from_config(cfg: &bascula_config::Config, endpoints: &bascula_config::Endpoints) -> Self {
        Self {
            stream_url: endpoints.stream_url.clone(),
            polling: cfg.into(),
            coordinator: cfg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_section_maps_to_demo_reading() {
        let mut cfg = bascula_config::Config::default();
        assert!(CoordinatorCfg::from(&cfg).demo.is_none());

        cfg.demo.enabled = true;
        cfg.demo.weight_g = 250.0;
        cfg.demo.unit = bascula_config::UnitCfg::Ml;
        let demo = CoordinatorCfg::from(&cfg).demo.expect("demo enabled");
        assert_eq!(demo.weight, 250.0);
        assert_eq!(demo.unit, Unit::Ml);
    }

    #[test]
    fn link_cfg_uses_resolved_stream_url() {
        let cfg = bascula_config::Config::default();
        let eps = bascula_config::Endpoints {
            base_url: "http://scale.local:8081".into(),
            stream_url: "ws://scale.local:8081/ws/scale".into(),
        };
        let link = LinkCfg::from_config(&cfg, &eps);
        assert_eq!(link.stream_url, "ws://scale.local:8081/ws/scale");
        assert_eq!(link.polling.read_every, Duration::from_millis(300));
        assert_eq!(link.coordinator.max_attempts, 10);
    }
}
