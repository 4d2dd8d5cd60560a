//! Pull transport: two self-rescheduling request cycles.
//!
//! The read cycle hits the read endpoint every `read_every`, the status cycle
//! the status endpoint every `status_every`. Each cycle has at most one request
//! in flight. A scheduled tick that finds its request still running is skipped;
//! an explicit `read_now` supersedes and aborts the running read instead.
//!
//! A 404 from the read endpoint ends the read cycle for the rest of the
//! session. The status cycle keeps going.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bascula_traits::ScaleApi;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::coordinator::Event;
use crate::error::LinkError;
use crate::transport_error::map_transport_error;
use crate::wire::{ReadOutcome, StatusOutcome, parse_read_reply, parse_status_reply};

pub const READ_EVERY: Duration = Duration::from_millis(300);
pub const STATUS_EVERY: Duration = Duration::from_millis(2_000);
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(5_000);

pub type EventSink = mpsc::UnboundedSender<Event>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingCfg {
    pub read_every: Duration,
    pub status_every: Duration,
    /// Upper bound on one request, on top of whatever the api enforces.
    pub request_timeout: Duration,
}

impl Default for PollingCfg {
    fn default() -> Self {
        Self {
            read_every: READ_EVERY,
            status_every: STATUS_EVERY,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    active: Option<u64>,
    handle: Option<AbortHandle>,
}

/// At-most-one-request guard for an endpoint.
///
/// A request reserves a generation before it is spawned and reports back with
/// it. Only the current generation may deliver a result.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    slot: Arc<Mutex<Slot>>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_busy(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Reserve a generation unless a request is already running.
    pub fn try_begin(&self) -> Option<u64> {
        let mut slot = self.lock();
        if slot.active.is_some() {
            return None;
        }
        slot.generation += 1;
        slot.active = Some(slot.generation);
        slot.handle = None;
        Some(slot.generation)
    }

    /// Abort whatever is running and reserve a new generation.
    pub fn supersede(&self) -> u64 {
        let mut slot = self.lock();
        if let Some(h) = slot.handle.take() {
            h.abort();
        }
        slot.generation += 1;
        slot.active = Some(slot.generation);
        slot.generation
    }

    /// Bind the task running `generation`. A task whose generation is no
    /// longer current is aborted on the spot.
    pub fn attach(&self, generation: u64, handle: AbortHandle) {
        let mut slot = self.lock();
        if slot.active == Some(generation) {
            slot.handle = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Release the slot. `false` means the request was superseded or
    /// cancelled and its result must be dropped.
    pub fn finish(&self, generation: u64) -> bool {
        let mut slot = self.lock();
        if slot.active == Some(generation) {
            slot.active = None;
            slot.handle = None;
            true
        } else {
            false
        }
    }

    pub fn cancel(&self) {
        let mut slot = self.lock();
        if let Some(h) = slot.handle.take() {
            h.abort();
        }
        slot.active = None;
        slot.generation += 1;
    }
}

#[derive(Clone)]
struct Shared {
    api: Arc<dyn ScaleApi>,
    cfg: PollingCfg,
    sink: EventSink,
    session: u64,
}

struct Running {
    session: u64,
    read_cycle: JoinHandle<()>,
    status_cycle: JoinHandle<()>,
    read_guard: InFlight,
    status_guard: InFlight,
    shared: Shared,
}

pub struct PollingClient {
    api: Arc<dyn ScaleApi>,
    cfg: PollingCfg,
    sink: EventSink,
    run: Option<Running>,
}

impl std::fmt::Debug for PollingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingClient")
            .field("cfg", &self.cfg)
            .field("session", &self.session())
            .finish()
    }
}

impl PollingClient {
    pub fn new(api: Arc<dyn ScaleApi>, cfg: PollingCfg, sink: EventSink) -> Self {
        Self {
            api,
            cfg,
            sink,
            run: None,
        }
    }

    pub fn session(&self) -> Option<u64> {
        self.run.as_ref().map(|r| r.session)
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Start both cycles for `session`, replacing any previous session. The
    /// first request of each cycle goes out immediately.
    pub fn start(&mut self, session: u64) {
        self.stop();
        let shared = Shared {
            api: self.api.clone(),
            cfg: self.cfg,
            sink: self.sink.clone(),
            session,
        };
        let read_guard = InFlight::default();
        let status_guard = InFlight::default();
        let read_cycle = tokio::spawn(read_cycle(shared.clone(), read_guard.clone()));
        let status_cycle = tokio::spawn(status_cycle(shared.clone(), status_guard.clone()));
        tracing::debug!(session, "polling started");
        self.run = Some(Running {
            session,
            read_cycle,
            status_cycle,
            read_guard,
            status_guard,
            shared,
        });
    }

    /// Stop both cycles and abort anything in flight. Idempotent.
    pub fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.read_cycle.abort();
            run.status_cycle.abort();
            run.read_guard.cancel();
            run.status_guard.cancel();
            tracing::debug!(session = run.session, "polling stopped");
        }
    }

    /// Fire a read right away, cancelling a read still in flight. Returns
    /// `false` when polling is not running.
    pub fn read_now(&self) -> bool {
        let Some(run) = &self.run else {
            return false;
        };
        let generation = run.read_guard.supersede();
        let task = tokio::spawn(read_once(
            run.shared.clone(),
            run.read_guard.clone(),
            generation,
        ));
        run.read_guard.attach(generation, task.abort_handle());
        true
    }
}

impl Drop for PollingClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One read request. Returns whether the endpoint reported 404, counting only
/// results that were actually delivered.
async fn read_once(shared: Shared, guard: InFlight, generation: u64) -> bool {
    let outcome =
        match tokio::time::timeout(shared.cfg.request_timeout, shared.api.read()).await {
            Ok(Ok(reply)) => parse_read_reply(&reply),
            Ok(Err(e)) => ReadOutcome::Failed(map_transport_error(e.as_ref())),
            Err(_) => ReadOutcome::Failed(LinkError::Timeout),
        };
    if !guard.finish(generation) {
        tracing::trace!(generation, "stale read result dropped");
        return false;
    }
    let missing = matches!(outcome, ReadOutcome::EndpointMissing);
    let _ = shared.sink.send(Event::Read {
        session: shared.session,
        outcome,
    });
    missing
}

async fn status_once(shared: Shared, guard: InFlight, generation: u64) {
    let outcome =
        match tokio::time::timeout(shared.cfg.request_timeout, shared.api.status()).await {
            Ok(Ok(reply)) => parse_status_reply(&reply),
            Ok(Err(e)) => StatusOutcome::Failed(map_transport_error(e.as_ref())),
            Err(_) => StatusOutcome::Failed(LinkError::Timeout),
        };
    if guard.finish(generation) {
        let _ = shared.sink.send(Event::Status {
            session: shared.session,
            outcome,
        });
    }
}

async fn read_cycle(shared: Shared, guard: InFlight) {
    loop {
        if shared.sink.is_closed() {
            break;
        }
        match guard.try_begin() {
            Some(generation) => {
                let task = tokio::spawn(read_once(shared.clone(), guard.clone(), generation));
                guard.attach(generation, task.abort_handle());
                // A superseded request surfaces as a join error; keep cycling.
                if let Ok(true) = task.await {
                    tracing::warn!(session = shared.session, "read endpoint missing; read cycle ended");
                    break;
                }
            }
            None => tracing::trace!("read still in flight; tick skipped"),
        }
        tokio::time::sleep(shared.cfg.read_every).await;
    }
}

async fn status_cycle(shared: Shared, guard: InFlight) {
    loop {
        if shared.sink.is_closed() {
            break;
        }
        match guard.try_begin() {
            Some(generation) => {
                let task = tokio::spawn(status_once(shared.clone(), guard.clone(), generation));
                guard.attach(generation, task.abort_handle());
                let _ = task.await;
            }
            None => tracing::trace!("status still in flight; tick skipped"),
        }
        tokio::time::sleep(shared.cfg.status_every).await;
    }
}
