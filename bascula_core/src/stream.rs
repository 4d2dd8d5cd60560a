//! Push transport: one socket task per epoch.
//!
//! The task connects, reports `StreamOpened`, turns every text frame into a
//! `StreamFrame` (or `StreamMalformed`) and finishes with exactly one of
//! `StreamClosed` or `StreamFailed`. All of it is tagged with the epoch so the
//! coordinator can drop traffic from a socket it already gave up on.

use std::sync::Arc;

use bascula_traits::{Frame, StreamConnector};
use tokio::task::JoinHandle;

use crate::coordinator::Event;
use crate::error::LinkError;
use crate::poller::EventSink;
use crate::transport_error::map_transport_error;
use crate::wire::parse_frame;

pub struct StreamClient {
    connector: Arc<dyn StreamConnector>,
    url: String,
    sink: EventSink,
    live: Option<(u64, JoinHandle<()>)>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.url)
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl StreamClient {
    pub fn new(connector: Arc<dyn StreamConnector>, url: impl Into<String>, sink: EventSink) -> Self {
        Self {
            connector,
            url: url.into(),
            sink,
            live: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn epoch(&self) -> Option<u64> {
        self.live.as_ref().map(|(e, _)| *e)
    }

    /// Open a socket for `epoch`, closing any previous one first.
    pub fn open(&mut self, epoch: u64) {
        self.close();
        let task = tokio::spawn(run_socket(
            self.connector.clone(),
            self.url.clone(),
            self.sink.clone(),
            epoch,
        ));
        tracing::debug!(epoch, url = %self.url, "opening stream");
        self.live = Some((epoch, task));
    }

    /// Drop the live socket, if any. Nothing is reported for it afterwards.
    pub fn close(&mut self) {
        if let Some((epoch, task)) = self.live.take() {
            task.abort();
            tracing::debug!(epoch, "stream closed locally");
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    connector: Arc<dyn StreamConnector>,
    url: String,
    sink: EventSink,
    epoch: u64,
) {
    let mut source = match connector.connect(&url).await {
        Ok(s) => s,
        Err(e) => {
            let error = map_transport_error(e.as_ref());
            tracing::debug!(epoch, %error, "stream connect failed");
            let _ = sink.send(Event::StreamFailed { epoch, error });
            return;
        }
    };
    if sink.send(Event::StreamOpened { epoch }).is_err() {
        return;
    }
    loop {
        let event = match source.next_frame().await {
            Some(Ok(Frame::Text(text))) => match parse_frame(&text) {
                Ok(update) => Event::StreamFrame { epoch, update },
                Err(e) => Event::StreamMalformed {
                    epoch,
                    detail: e.to_string(),
                },
            },
            Some(Ok(Frame::Closed { code, reason })) => {
                let reason = match (code, reason) {
                    (_, Some(r)) if !r.is_empty() => Some(r),
                    (Some(c), _) => Some(format!("close code {c}")),
                    _ => None,
                };
                let _ = sink.send(Event::StreamClosed { epoch, reason });
                return;
            }
            Some(Err(e)) => {
                // Only the handshake can mean "no such endpoint".
                let error = match map_transport_error(e.as_ref()) {
                    LinkError::NotFound(m) => LinkError::Transport(m),
                    other => other,
                };
                let _ = sink.send(Event::StreamFailed { epoch, error });
                return;
            }
            None => {
                let _ = sink.send(Event::StreamClosed {
                    epoch,
                    reason: None,
                });
                return;
            }
        };
        if sink.send(event).is_err() {
            return;
        }
    }
}
