//! Transport coordinator: the state machine that owns the published reading.
//!
//! The coordinator does no I/O. Transport tasks report `Event`s; `handle`
//! applies them synchronously and answers with `Command`s for the runtime to
//! execute. Every event carries the id of the socket, timer or poll session it
//! came from, and events from anything superseded or cancelled are dropped
//! without touching state.
//!
//! ```text
//! disconnected -> connecting -> streaming <-> reconnecting -> polling-fallback
//! ```
//!
//! Polling runs whenever the stream is down, including as a bridge while a
//! reconnect is pending. It never runs while `streaming`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bascula_traits::clock::{Clock, MonotonicClock};
use tokio::sync::watch;

use crate::backoff::BackoffPolicy;
use crate::error::LinkError;
use crate::publish::ReadingBus;
use crate::reading::{ConnectionState, Unit, WeightReading};
use crate::stability::{Sample, StabilityCfg, StabilityEstimator};
use crate::wire::{ReadOutcome, ScaleUpdate, StatusOutcome, StreamUpdate};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

pub const READ_ENDPOINT_MISSING: &str = "scale read endpoint not found (backend version mismatch)";
pub const BACKEND_UNREACHABLE: &str = "unable to reach the scale backend";
pub const STREAM_ENDPOINT_MISSING: &str = "live stream endpoint not found; using polling";

/// Reading published in demo mode instead of touching the network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoReading {
    pub weight: f64,
    pub unit: Unit,
}

#[derive(Debug, Clone)]
pub struct CoordinatorCfg {
    pub backoff: BackoffPolicy,
    /// Reconnects scheduled before polling becomes permanent.
    pub max_attempts: u32,
    pub stability: StabilityCfg,
    pub demo: Option<DemoReading>,
}

impl Default for CoordinatorCfg {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            stability: StabilityCfg::default(),
            demo: None,
        }
    }
}

/// Work requested from the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open a socket; its events must carry `epoch`.
    OpenStream { epoch: u64 },
    CloseStream,
    /// Start both poll cycles; their events must carry `session`.
    StartPolling { session: u64 },
    StopPolling,
    /// Deliver `Event::ReconnectDue { token }` after `delay`.
    ScheduleReconnect { token: u64, delay: Duration },
    CancelReconnect,
}

/// Something a transport or timer observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StreamOpened { epoch: u64 },
    StreamFrame { epoch: u64, update: StreamUpdate },
    StreamMalformed { epoch: u64, detail: String },
    StreamFailed { epoch: u64, error: LinkError },
    StreamClosed { epoch: u64, reason: Option<String> },
    ReconnectDue { token: u64 },
    Read { session: u64, outcome: ReadOutcome },
    Status { session: u64, outcome: StatusOutcome },
}

pub struct Coordinator {
    cfg: CoordinatorCfg,
    state: ConnectionState,
    reading: WeightReading,
    attempts: u32,
    estimator: StabilityEstimator,
    // Live socket epoch, pending reconnect token, running poll session.
    stream: Option<u64>,
    reconnect: Option<u64>,
    poll_session: Option<u64>,
    next_id: u64,
    read_endpoint_missing: bool,
    fallback_reason: Option<String>,
    started: bool,
    inert: bool,
    clock: Arc<dyn Clock>,
    epoch: Instant,
    rng: fastrand::Rng,
    bus: ReadingBus,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .field("stream", &self.stream)
            .field("reconnect", &self.reconnect)
            .field("poll_session", &self.poll_session)
            .field("inert", &self.inert)
            .finish()
    }
}

impl Coordinator {
    pub fn new(cfg: CoordinatorCfg) -> Self {
        Self::with_clock(cfg, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(cfg: CoordinatorCfg, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            estimator: StabilityEstimator::new(cfg.stability),
            cfg,
            state: ConnectionState::Disconnected,
            reading: WeightReading::default(),
            attempts: 0,
            stream: None,
            reconnect: None,
            poll_session: None,
            next_id: 1,
            read_endpoint_missing: false,
            fallback_reason: None,
            started: false,
            inert: false,
            clock,
            epoch,
            rng: fastrand::Rng::new(),
            bus: ReadingBus::new(),
        }
    }

    /// Seed the jitter generator (deterministic delays in tests).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<WeightReading> {
        self.bus.subscribe()
    }

    pub fn observe<F>(&mut self, f: F)
    where
        F: Fn(&WeightReading) + Send + Sync + 'static,
    {
        self.bus.observe(f);
    }

    pub fn reading(&self) -> &WeightReading {
        &self.reading
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn stream_epoch(&self) -> Option<u64> {
        self.stream
    }

    pub fn pending_reconnect(&self) -> Option<u64> {
        self.reconnect
    }

    pub fn poll_session(&self) -> Option<u64> {
        self.poll_session
    }

    pub fn is_polling(&self) -> bool {
        self.poll_session.is_some()
    }

    pub fn is_inert(&self) -> bool {
        self.inert
    }

    /// Mount. Demo mode publishes the synthetic reading and opens nothing.
    /// Calling it again, or after `stop`, does nothing.
    pub fn start(&mut self) -> Vec<Command> {
        if self.started || self.inert {
            return Vec::new();
        }
        self.started = true;
        let mut cmds = Vec::new();
        if let Some(demo) = self.cfg.demo {
            tracing::info!(weight = demo.weight, unit = %demo.unit, "demo mode; transports disabled");
            self.reading = WeightReading {
                weight: demo.weight,
                unit: demo.unit,
                stable: true,
                connected: true,
                ..WeightReading::default()
            };
        } else {
            self.set_state(ConnectionState::Connecting);
            cmds.push(self.open_stream());
        }
        self.sync();
        cmds
    }

    /// Unmount: cancel everything and go inert. Idempotent.
    pub fn stop(&mut self) -> Vec<Command> {
        if self.inert {
            return Vec::new();
        }
        self.inert = true;
        let mut cmds = Vec::new();
        if self.stream.take().is_some() {
            cmds.push(Command::CloseStream);
        }
        if self.reconnect.take().is_some() {
            cmds.push(Command::CancelReconnect);
        }
        if self.poll_session.take().is_some() {
            cmds.push(Command::StopPolling);
        }
        self.set_state(ConnectionState::Disconnected);
        self.attempts = 0;
        self.estimator.reset();
        self.fallback_reason = None;
        self.read_endpoint_missing = false;
        self.reading = WeightReading::default();
        self.bus.publish(&self.reading);
        tracing::debug!("coordinator stopped");
        cmds
    }

    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        if self.inert || !self.started {
            tracing::trace!(?event, "coordinator idle; event dropped");
            return Vec::new();
        }
        let mut cmds = Vec::new();
        match event {
            Event::StreamOpened { epoch } => {
                if self.is_live(epoch) {
                    self.on_stream_open(&mut cmds);
                }
            }
            Event::StreamFrame { epoch, update } => {
                if self.is_live(epoch) && self.state == ConnectionState::Streaming {
                    self.on_frame(update);
                }
            }
            Event::StreamMalformed { epoch, detail } => {
                if self.is_live(epoch) {
                    tracing::warn!(epoch, %detail, "dropping malformed frame");
                }
            }
            Event::StreamFailed { epoch, error } => {
                if self.is_live(epoch) {
                    if matches!(error, LinkError::NotFound(_)) {
                        self.on_stream_missing(&mut cmds);
                    } else {
                        self.on_stream_lost(&error.to_string(), &mut cmds);
                    }
                }
            }
            Event::StreamClosed { epoch, reason } => {
                if self.is_live(epoch) {
                    let reason = reason.unwrap_or_else(|| "closed by peer".to_string());
                    self.on_stream_lost(&reason, &mut cmds);
                }
            }
            Event::ReconnectDue { token } => {
                if self.reconnect == Some(token) {
                    self.reconnect = None;
                    if self.state == ConnectionState::Reconnecting {
                        tracing::info!(attempt = self.attempts, "reconnecting stream");
                        cmds.push(self.open_stream());
                    }
                }
            }
            Event::Read { session, outcome } => {
                if self.poll_session == Some(session) {
                    self.on_read(outcome);
                }
            }
            Event::Status { session, outcome } => {
                if self.poll_session == Some(session) {
                    self.on_status(outcome);
                }
            }
        }
        self.sync();
        debug_assert!(
            self.invariant_violation().is_none(),
            "coordinator invariant broken: {:?}",
            self.invariant_violation()
        );
        cmds
    }

    /// First broken invariant, if any.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        use ConnectionState::*;
        if self.inert
            && (self.stream.is_some() || self.reconnect.is_some() || self.poll_session.is_some())
        {
            return Some("inert coordinator still owns transports");
        }
        if self.attempts > self.cfg.max_attempts {
            return Some("attempts above budget");
        }
        match self.state {
            Streaming if self.poll_session.is_some() => Some("polling while streaming"),
            Streaming if self.stream.is_none() => Some("streaming without a socket"),
            PollingFallback if self.poll_session.is_none() => Some("fallback without polling"),
            PollingFallback if self.stream.is_some() || self.reconnect.is_some() => {
                Some("fallback still reconnecting")
            }
            Reconnecting if self.poll_session.is_none() => Some("reconnecting without bridge"),
            Reconnecting if self.stream.is_some() == self.reconnect.is_some() => {
                Some("reconnecting needs exactly one of socket or timer")
            }
            _ => None,
        }
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.stream == Some(epoch)
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn open_stream(&mut self) -> Command {
        let epoch = self.fresh_id();
        self.stream = Some(epoch);
        Command::OpenStream { epoch }
    }

    fn ensure_polling(&mut self, cmds: &mut Vec<Command>) {
        if self.poll_session.is_none() {
            let session = self.fresh_id();
            self.poll_session = Some(session);
            // The new session's read cycle starts fresh.
            self.read_endpoint_missing = false;
            cmds.push(Command::StartPolling { session });
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, attempts = self.attempts, "link state");
            self.state = next;
        }
    }

    fn sync(&mut self) {
        self.reading.state = self.state;
        self.reading.reconnect_attempts = self.attempts;
        self.bus.publish(&self.reading);
    }

    /// Error shown while nothing else is wrong.
    fn standing_notice(&self) -> Option<String> {
        if self.state == ConnectionState::PollingFallback {
            self.fallback_reason.clone()
        } else {
            None
        }
    }

    fn on_stream_open(&mut self, cmds: &mut Vec<Command>) {
        if self.poll_session.take().is_some() {
            cmds.push(Command::StopPolling);
        }
        if self.reconnect.take().is_some() {
            cmds.push(Command::CancelReconnect);
        }
        self.attempts = 0;
        self.set_state(ConnectionState::Streaming);
        self.reading.connected = true;
        self.reading.error = None;
    }

    fn on_frame(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::Update(u) => {
                self.apply_update(u);
                self.reading.connected = true;
                self.reading.error = None;
            }
            StreamUpdate::Fault { reason } => {
                tracing::warn!(%reason, "backend reports scale fault");
                self.reading.connected = false;
                self.reading.error = Some(reason);
            }
        }
    }

    fn on_stream_lost(&mut self, reason: &str, cmds: &mut Vec<Command>) {
        self.stream = None;
        cmds.push(Command::CloseStream);
        self.ensure_polling(cmds);
        self.reading.connected = false;

        if self.attempts < self.cfg.max_attempts {
            let delay = self.cfg.backoff.next_delay_with(self.attempts, &mut self.rng);
            self.attempts += 1;
            let token = self.fresh_id();
            self.reconnect = Some(token);
            cmds.push(Command::ScheduleReconnect { token, delay });
            tracing::warn!(
                %reason,
                attempt = self.attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "stream lost; polling until reconnect"
            );
            self.set_state(ConnectionState::Reconnecting);
            self.reading.error = Some(format!("stream lost ({reason}); reconnecting"));
        } else {
            let notice = format!(
                "live stream unavailable after {} reconnect attempts; using polling",
                self.cfg.max_attempts
            );
            tracing::error!(%reason, attempts = self.attempts, "reconnect budget exhausted");
            self.enter_fallback(notice);
        }
    }

    fn on_stream_missing(&mut self, cmds: &mut Vec<Command>) {
        tracing::error!("stream endpoint not found; falling back to polling");
        self.stream = None;
        cmds.push(Command::CloseStream);
        if self.reconnect.take().is_some() {
            cmds.push(Command::CancelReconnect);
        }
        self.ensure_polling(cmds);
        self.reading.connected = false;
        self.enter_fallback(STREAM_ENDPOINT_MISSING.to_string());
    }

    fn enter_fallback(&mut self, notice: String) {
        self.set_state(ConnectionState::PollingFallback);
        self.reading.error = Some(notice.clone());
        self.fallback_reason = Some(notice);
    }

    fn apply_update(&mut self, u: ScaleUpdate) {
        if let Some(unit) = u.unit {
            self.reading.unit = unit;
        }
        match u.weight {
            Some(w) => {
                let sample = Sample {
                    value_g: w,
                    timestamp_ms: self.clock.ms_since(self.epoch),
                };
                self.reading.weight = w;
                self.reading.stable = self.estimator.observe(sample, u.stable);
            }
            None => {
                if let Some(stable) = u.stable {
                    self.reading.stable = stable;
                }
            }
        }
    }

    fn on_read(&mut self, outcome: ReadOutcome) {
        match outcome {
            ReadOutcome::Reading(u) => {
                self.apply_update(u);
                self.read_endpoint_missing = false;
                self.reading.connected = true;
                self.reading.error = self.standing_notice();
            }
            ReadOutcome::Rejected { reason } => {
                self.reading.connected = false;
                self.reading.error = Some(reason);
            }
            ReadOutcome::EndpointMissing => {
                tracing::error!("read endpoint returned 404; read cycle halted");
                self.read_endpoint_missing = true;
                self.reading.connected = false;
                self.reading.error = Some(READ_ENDPOINT_MISSING.to_string());
            }
            ReadOutcome::Failed(e) => {
                tracing::debug!(error = %e, "read failed");
                self.reading.connected = false;
                self.reading.error = Some(BACKEND_UNREACHABLE.to_string());
            }
            ReadOutcome::Malformed(detail) => {
                tracing::warn!(%detail, "dropping malformed read response");
            }
        }
    }

    fn on_status(&mut self, outcome: StatusOutcome) {
        match outcome {
            StatusOutcome::Online => {
                self.reading.connected = true;
                self.reading.error = if self.read_endpoint_missing {
                    Some(READ_ENDPOINT_MISSING.to_string())
                } else {
                    self.standing_notice()
                };
            }
            StatusOutcome::Offline { reason } => {
                self.reading.connected = false;
                // A halted read cycle needs intervention; keep saying so.
                self.reading.error = if self.read_endpoint_missing {
                    Some(READ_ENDPOINT_MISSING.to_string())
                } else {
                    Some(reason.unwrap_or_else(|| "scale offline".to_string()))
                };
            }
            StatusOutcome::Failed(e) => {
                tracing::debug!(error = %e, "status failed");
                self.reading.connected = false;
                if !self.read_endpoint_missing {
                    self.reading.error = Some(BACKEND_UNREACHABLE.to_string());
                }
            }
            StatusOutcome::Malformed(detail) => {
                tracing::warn!(%detail, "dropping malformed status response");
            }
        }
    }
}
