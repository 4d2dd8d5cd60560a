//! Seams between the scale link and the outside world.
//!
//! The link only talks to the backend through these traits. Concrete HTTP and
//! WebSocket implementations live in `bascula_http`; tests plug in scripted
//! fakes.
pub mod clock;
pub mod endpoints;

pub use clock::{Clock, MonotonicClock};

use async_trait::async_trait;

/// Error type crossing the trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Status line and body of a finished HTTP exchange.
///
/// Non-2xx statuses are not errors at this level; the caller decides what a
/// 404 or a 500 means for its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 200 with the given JSON body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }
}

/// Pull surface of the scale backend.
#[async_trait]
pub trait ScaleApi: Send + Sync {
    /// `GET /api/scale/read`
    async fn read(&self) -> Result<HttpReply, BoxError>;
    /// `GET /api/scale/status`
    async fn status(&self) -> Result<HttpReply, BoxError>;
    /// `POST /api/scale/tare`
    async fn tare(&self) -> Result<HttpReply, BoxError>;
    /// `POST /api/scale/calibrate`
    async fn calibrate(
        &self,
        known_grams: f64,
    ) -> Result<HttpReply, BoxError>;
    /// `GET /health`. Backends without a health route keep the default.
    async fn health(&self) -> Result<HttpReply, BoxError> {
        Ok(HttpReply::new(404, ""))
    }
}

/// One inbound unit from a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Peer closed the channel, optionally with a close code and reason.
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// An open push channel.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, an error, or `None` once the channel is gone.
    ///
    /// Dropping the source closes the underlying connection.
    async fn next_frame(&mut self) -> Option<Result<Frame, BoxError>>;
}

/// Opens push channels.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, BoxError>;
}
