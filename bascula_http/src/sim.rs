//! In-process stand-in for the scale backend.
//!
//! Implements both `ScaleApi` and `StreamConnector` over one shared load cell
//! model: the reading settles toward the placed load by half the remaining
//! distance per sample, plus bounded noise. Failure switches (offline scale,
//! missing routes, dropped sockets) make it usable for exercising fallback
//! paths without a network.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bascula_traits::{BoxError, Frame, FrameSource, HttpReply, ScaleApi, StreamConnector};
use serde_json::json;

use crate::error::HttpError;

const SETTLED_G: f64 = 0.05;

#[derive(Debug)]
struct SimState {
    load_g: f64,
    raw_g: f64,
    tare_g: f64,
    factor: f64,
    noise_g: f64,
    online: bool,
    stream_route: bool,
    read_route: bool,
    // Bumped to sever every open socket.
    socket_gen: u64,
    rng: fastrand::Rng,
}

impl SimState {
    /// Advance the model one sample and return net grams.
    fn sample(&mut self) -> f64 {
        self.raw_g += (self.load_g - self.raw_g) * 0.5;
        let noise = if self.noise_g > 0.0 {
            (self.rng.f64() * 2.0 - 1.0) * self.noise_g
        } else {
            0.0
        };
        ((self.raw_g + noise - self.tare_g) * self.factor * 100.0).round() / 100.0
    }

    fn settled(&self) -> bool {
        (self.load_g - self.raw_g).abs() < SETTLED_G
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
    frame_every: Duration,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                load_g: 0.0,
                raw_g: 0.0,
                tare_g: 0.0,
                factor: 1.0,
                noise_g: 0.1,
                online: true,
                stream_route: true,
                read_route: true,
                socket_gen: 0,
                rng,
            })),
            frame_every: Duration::from_millis(100),
        }
    }

    /// Interval between pushed frames.
    pub fn frame_every(mut self, every: Duration) -> Self {
        self.frame_every = every;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put `grams` on the pan.
    pub fn place(&self, grams: f64) {
        self.lock().load_g = grams;
    }

    /// Peak noise amplitude in grams; 0 for an ideal cell.
    pub fn set_noise(&self, grams: f64) {
        self.lock().noise_g = grams.max(0.0);
    }

    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// Without the route, socket handshakes get a 404.
    pub fn set_stream_route(&self, present: bool) {
        self.lock().stream_route = present;
    }

    /// Without the route, reads get a 404.
    pub fn set_read_route(&self, present: bool) {
        self.lock().read_route = present;
    }

    /// Close every open socket with code 1001.
    pub fn drop_sockets(&self) {
        self.lock().socket_gen += 1;
    }

    fn reading_json(&self) -> serde_json::Value {
        let mut s = self.lock();
        if !s.online {
            return json!({ "ok": false, "reason": "scale offline" });
        }
        let grams = s.sample();
        json!({ "ok": true, "grams": grams, "weight": grams, "unit": "g" })
    }
}

fn reply(value: &serde_json::Value) -> Result<HttpReply, BoxError> {
    Ok(HttpReply::ok(value.to_string()))
}

#[async_trait]
impl ScaleApi for SimulatedBackend {
    async fn read(&self) -> Result<HttpReply, BoxError> {
        if !self.lock().read_route {
            return Ok(HttpReply::new(404, r#"{"detail":"Not Found"}"#));
        }
        reply(&self.reading_json())
    }

    async fn status(&self) -> Result<HttpReply, BoxError> {
        let online = self.lock().online;
        if online {
            reply(&json!({ "ok": true, "backend": "sim" }))
        } else {
            reply(&json!({ "ok": false, "backend": "sim", "reason": "scale offline" }))
        }
    }

    async fn tare(&self) -> Result<HttpReply, BoxError> {
        let mut s = self.lock();
        if !s.online {
            return reply(&json!({ "ok": false, "reason": "scale offline" }));
        }
        s.tare_g = s.raw_g;
        reply(&json!({ "ok": true, "message": "tared" }))
    }

    async fn calibrate(&self, known_grams: f64) -> Result<HttpReply, BoxError> {
        let mut s = self.lock();
        let net = s.raw_g - s.tare_g;
        if !s.online {
            return reply(&json!({ "ok": false, "reason": "scale offline" }));
        }
        if net <= 0.0 || !s.settled() {
            return reply(&json!({ "ok": false, "reason": "place a settled reference load first" }));
        }
        s.factor = known_grams / net;
        tracing::debug!(factor = s.factor, "simulated calibration applied");
        reply(&json!({ "ok": true, "message": "calibrated" }))
    }

    async fn health(&self) -> Result<HttpReply, BoxError> {
        let online = self.lock().online;
        reply(&json!({ "status": "ok", "scale_connected": online }))
    }
}

#[async_trait]
impl StreamConnector for SimulatedBackend {
    async fn connect(&self, _url: &str) -> Result<Box<dyn FrameSource>, BoxError> {
        let s = self.lock();
        if !s.stream_route {
            return Err(Box::new(HttpError::Handshake { status: 404 }));
        }
        Ok(Box::new(SimSource {
            backend: self.clone(),
            generation: s.socket_gen,
            closed: false,
        }))
    }
}

struct SimSource {
    backend: SimulatedBackend,
    generation: u64,
    closed: bool,
}

#[async_trait]
impl FrameSource for SimSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, BoxError>> {
        if self.closed {
            return None;
        }
        tokio::time::sleep(self.backend.frame_every).await;
        if self.backend.lock().socket_gen != self.generation {
            self.closed = true;
            return Some(Ok(Frame::Closed {
                code: Some(1001),
                reason: Some("simulated drop".to_string()),
            }));
        }
        Some(Ok(Frame::Text(self.backend.reading_json().to_string())))
    }
}
