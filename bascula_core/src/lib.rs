#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Live weight link to a kitchen-scale backend (transport-agnostic).
//!
//! The backend is reached through `bascula_traits::ScaleApi` (HTTP pull) and
//! `bascula_traits::StreamConnector` (WebSocket push). This crate decides
//! which of the two is used at any moment and turns whatever arrives into one
//! published `WeightReading`.
//!
//! ## Architecture
//!
//! - **Coordinator**: sans-IO state machine; events in, commands out (`coordinator`)
//! - **Backoff**: capped exponential reconnect schedule with jitter (`backoff`)
//! - **Stability**: rolling max-min window with a dwell time (`stability`)
//! - **Transports**: poll cycles (`poller`) and the socket task (`stream`)
//! - **Link**: driver task wiring the above together (`link`)
//!
//! ## Example
//!
//! ```no_run
//! # async fn run(api: std::sync::Arc<dyn bascula_traits::ScaleApi>,
//! #              ws: std::sync::Arc<dyn bascula_traits::StreamConnector>) -> eyre::Result<()> {
//! let mut link = bascula_core::ScaleLink::builder()
//!     .with_api(api)
//!     .with_connector(ws)
//!     .start()?;
//! let mut rx = link.subscribe();
//! rx.changed().await?;
//! println!("{} {}", rx.borrow().weight, rx.borrow().unit);
//! link.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod commands;
pub mod conversions;
pub mod coordinator;
pub mod error;
pub mod link;
pub mod poller;
pub mod publish;
pub mod reading;
pub mod stability;
pub mod stream;
pub mod transport_error;
pub mod wire;

pub use backoff::BackoffPolicy;
pub use coordinator::{Command, Coordinator, CoordinatorCfg, DemoReading, Event};
pub use error::{BuildError, LinkError, Report, Result};
pub use link::{LinkCfg, ScaleLink, ScaleLinkBuilder, TokioClock};
pub use poller::{PollingCfg, PollingClient};
pub use reading::{ConnectionState, Unit, WeightReading};
pub use stability::{Sample, StabilityCfg, StabilityEstimator, StabilityWindow};
pub use stream::StreamClient;
