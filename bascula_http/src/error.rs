use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    /// WebSocket upgrade answered with a plain HTTP status.
    #[error("stream handshake rejected with HTTP {status}")]
    Handshake { status: u16 },
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(String),
}

pub type Result<T> = std::result::Result<T, HttpError>;

#[cfg(feature = "net")]
impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HttpError::Timeout
        } else if e.is_connect() {
            HttpError::Connect(e.to_string())
        } else if e.is_builder() {
            HttpError::InvalidUrl(e.to_string())
        } else {
            HttpError::Request(e.to_string())
        }
    }
}

#[cfg(feature = "net")]
impl From<tokio_tungstenite::tungstenite::Error> for HttpError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::Http(resp) => HttpError::Handshake {
                status: resp.status().as_u16(),
            },
            WsError::Io(io) => HttpError::Connect(io.to_string()),
            WsError::Url(u) => HttpError::InvalidUrl(u.to_string()),
            other => HttpError::WebSocket(other.to_string()),
        }
    }
}
