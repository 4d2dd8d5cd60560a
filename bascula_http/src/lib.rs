#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Concrete transports for the scale link.
//!
//! - `HttpScaleApi`: `reqwest` client for the pull endpoints (feature `net`)
//! - `WsConnector`: `tokio-tungstenite` client for the push socket (feature `net`)
//! - `SimulatedBackend`: both surfaces in-process, for demos and tests
pub mod error;
pub mod sim;

#[cfg(feature = "net")]
pub mod client;
#[cfg(feature = "net")]
pub mod ws;

pub use error::HttpError;
pub use sim::SimulatedBackend;

#[cfg(feature = "net")]
pub use client::HttpScaleApi;
#[cfg(feature = "net")]
pub use ws::WsConnector;
