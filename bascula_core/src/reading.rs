//! Published reading and connection state.

use serde::{Deserialize, Serialize};

/// Unit reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    G,
    Ml,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::G => "g",
            Unit::Ml => "ml",
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transport, if any, currently feeds the reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
    /// Streaming gave up for this session; polling is the only source.
    PollingFallback,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::PollingFallback => "polling-fallback",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot handed to consumers.
///
/// Only the coordinator builds these; consumers get clones.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightReading {
    pub weight: f64,
    pub unit: Unit,
    #[serde(rename = "isStable")]
    pub stable: bool,
    #[serde(rename = "isConnected")]
    pub connected: bool,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
    pub state: ConnectionState,
}
