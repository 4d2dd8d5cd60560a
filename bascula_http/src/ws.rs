//! `tokio-tungstenite`-backed `StreamConnector`.

use std::time::Duration;

use async_trait::async_trait;
use bascula_traits::{BoxError, Frame, FrameSource, StreamConnector};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::HttpError;

#[derive(Debug, Clone, Copy)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, BoxError> {
        let (inner, resp) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| HttpError::Timeout)?
                .map_err(HttpError::from)?;
        tracing::debug!(url, status = resp.status().as_u16(), "websocket connected");
        Ok(Box::new(WsSource { inner }))
    }
}

struct WsSource {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, BoxError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(Frame::Text(text))),
                    Err(_) => tracing::trace!(len = bytes.len(), "skipping non-utf8 binary frame"),
                },
                // Pings are answered by tungstenite on the next read.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    return Some(Ok(Frame::Closed { code, reason }));
                }
                Err(e) => return Some(Err(Box::new(HttpError::from(e)))),
            }
        }
    }
}
