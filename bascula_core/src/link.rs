//! Runtime glue: a `ScaleLink` owns a coordinator and the transports it
//! drives.
//!
//! A single driver task feeds transport events into the coordinator and
//! executes the commands it returns. Readers never touch the driver; they get
//! a `watch` receiver or register an observer on the builder.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bascula_traits::clock::Clock;
use bascula_traits::{ScaleApi, StreamConnector};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::coordinator::{Command, Coordinator, CoordinatorCfg, Event};
use crate::error::{BuildError, Result};
use crate::poller::{EventSink, PollingCfg, PollingClient};
use crate::publish::Observer;
use crate::reading::WeightReading;
use crate::stream::StreamClient;

pub const DEFAULT_STREAM_URL: &str = "ws://127.0.0.1:8081/ws/scale";

#[derive(Debug, Clone)]
pub struct LinkCfg {
    /// Full socket URL, path included.
    pub stream_url: String,
    pub polling: PollingCfg,
    pub coordinator: CoordinatorCfg,
}

impl Default for LinkCfg {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            polling: PollingCfg::default(),
            coordinator: CoordinatorCfg::default(),
        }
    }
}

/// Clock that follows tokio's (pausable) timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Executes coordinator commands against live transports.
struct Transports {
    stream: Option<StreamClient>,
    poller: Option<PollingClient>,
    reconnect: Option<JoinHandle<()>>,
    sink: EventSink,
}

impl Transports {
    fn apply(&mut self, cmds: Vec<Command>) {
        for cmd in cmds {
            tracing::trace!(?cmd, "apply");
            match cmd {
                Command::OpenStream { epoch } => {
                    if let Some(s) = self.stream.as_mut() {
                        s.open(epoch);
                    }
                }
                Command::CloseStream => {
                    if let Some(s) = self.stream.as_mut() {
                        s.close();
                    }
                }
                Command::StartPolling { session } => {
                    if let Some(p) = self.poller.as_mut() {
                        p.start(session);
                    }
                }
                Command::StopPolling => {
                    if let Some(p) = self.poller.as_mut() {
                        p.stop();
                    }
                }
                Command::ScheduleReconnect { token, delay } => {
                    self.cancel_reconnect();
                    let sink = self.sink.clone();
                    self.reconnect = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = sink.send(Event::ReconnectDue { token });
                    }));
                }
                Command::CancelReconnect => self.cancel_reconnect(),
            }
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(t) = self.reconnect.take() {
            t.abort();
        }
    }

    fn read_now(&self) -> bool {
        self.poller.as_ref().is_some_and(PollingClient::read_now)
    }
}

impl Drop for Transports {
    fn drop(&mut self) {
        self.cancel_reconnect();
    }
}

enum Control {
    ReadNow,
}

/// A running connection to the scale backend.
///
/// Dropping the link asks the driver to tear down; call `stop` to wait for it.
pub struct ScaleLink {
    rx: watch::Receiver<WeightReading>,
    control: mpsc::UnboundedSender<Control>,
    shutdown: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ScaleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleLink")
            .field("reading", &*self.rx.borrow())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ScaleLink {
    pub fn builder() -> ScaleLinkBuilder<Missing, Missing> {
        ScaleLinkBuilder::default()
    }

    /// Latest published reading.
    pub fn reading(&self) -> WeightReading {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WeightReading> {
        self.rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_some()
    }

    /// Ask for a read right away. Only has an effect while polling.
    pub fn refresh(&self) {
        let _ = self.control.send(Control::ReadNow);
    }

    /// Tear everything down and wait for the driver to finish. Safe to call
    /// more than once.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::warn!(error = %e, "link driver ended abnormally");
            }
        }
    }
}

impl Drop for ScaleLink {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn drive(
    mut coord: Coordinator,
    mut transports: Transports,
    mut events: mpsc::UnboundedReceiver<Event>,
    mut control: mpsc::UnboundedReceiver<Control>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(ev) = events.recv() => {
                let cmds = coord.handle(ev);
                transports.apply(cmds);
            }
            Some(ctl) = control.recv() => match ctl {
                Control::ReadNow => {
                    if !transports.read_now() {
                        tracing::debug!("refresh ignored; not polling");
                    }
                }
            },
            else => break,
        }
    }
    let cmds = coord.stop();
    transports.apply(cmds);
    tracing::debug!("link driver exited");
}

// Type-state markers for the builder.
pub struct Missing;
pub struct Set;

/// Builder for `ScaleLink`. `start` needs both transports; `try_start` checks
/// at runtime and accepts demo mode without any.
pub struct ScaleLinkBuilder<A, C> {
    api: Option<Arc<dyn ScaleApi>>,
    connector: Option<Arc<dyn StreamConnector>>,
    cfg: LinkCfg,
    clock: Option<Arc<dyn Clock>>,
    observers: Vec<Observer>,
    seed: Option<u64>,
    _a: PhantomData<A>,
    _c: PhantomData<C>,
}

impl Default for ScaleLinkBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            api: None,
            connector: None,
            cfg: LinkCfg::default(),
            clock: None,
            observers: Vec::new(),
            seed: None,
            _a: PhantomData,
            _c: PhantomData,
        }
    }
}

impl<A, C> ScaleLinkBuilder<A, C> {
    fn retag<A2, C2>(self) -> ScaleLinkBuilder<A2, C2> {
        ScaleLinkBuilder {
            api: self.api,
            connector: self.connector,
            cfg: self.cfg,
            clock: self.clock,
            observers: self.observers,
            seed: self.seed,
            _a: PhantomData,
            _c: PhantomData,
        }
    }

    pub fn with_config(mut self, cfg: LinkCfg) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fix the reconnect jitter sequence.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Register a callback for every published change.
    pub fn observe<F>(mut self, f: F) -> Self
    where
        F: Fn(&WeightReading) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(f));
        self
    }

    fn validate(&self) -> std::result::Result<(), BuildError> {
        let p = &self.cfg.polling;
        if p.read_every.is_zero() {
            return Err(BuildError::InvalidConfig("polling read interval must be > 0"));
        }
        if p.status_every.is_zero() {
            return Err(BuildError::InvalidConfig("polling status interval must be > 0"));
        }
        if p.request_timeout < Duration::from_millis(1) {
            return Err(BuildError::InvalidConfig("request timeout must be >= 1ms"));
        }
        let c = &self.cfg.coordinator;
        if c.backoff.initial.is_zero() {
            return Err(BuildError::InvalidConfig("initial reconnect delay must be > 0"));
        }
        if c.backoff.max < c.backoff.initial {
            return Err(BuildError::InvalidConfig(
                "max reconnect delay must be >= initial delay",
            ));
        }
        if c.stability.window < 2 {
            return Err(BuildError::InvalidConfig("stability window must be >= 2"));
        }
        if !(c.stability.eps_grams.is_finite() && c.stability.eps_grams > 0.0) {
            return Err(BuildError::InvalidConfig("stability epsilon must be positive"));
        }
        Ok(())
    }

    /// Start the link. Must run inside a tokio runtime. In demo mode the
    /// synthetic reading is already published when this returns.
    pub fn try_start(self) -> Result<ScaleLink> {
        self.validate().map_err(eyre::Report::new)?;
        let demo = self.cfg.coordinator.demo.is_some();
        if !demo {
            if self.api.is_none() {
                return Err(eyre::Report::new(BuildError::MissingApi));
            }
            if self.connector.is_none() {
                return Err(eyre::Report::new(BuildError::MissingConnector));
            }
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(TokioClock));
        let mut coord = Coordinator::with_clock(self.cfg.coordinator.clone(), clock);
        if let Some(seed) = self.seed {
            coord = coord.with_seed(seed);
        }
        for obs in self.observers {
            coord.observe(obs);
        }
        let rx = coord.subscribe();

        let (sink, events) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();

        let (stream, poller) = if demo {
            (None, None)
        } else {
            (
                self.connector
                    .map(|c| StreamClient::new(c, self.cfg.stream_url.clone(), sink.clone())),
                self.api
                    .map(|a| PollingClient::new(a, self.cfg.polling, sink.clone())),
            )
        };
        let mut transports = Transports {
            stream,
            poller,
            reconnect: None,
            sink,
        };

        let cmds = coord.start();
        transports.apply(cmds);
        tracing::info!(url = %self.cfg.stream_url, demo, "scale link started");

        let driver = tokio::spawn(drive(coord, transports, events, control_rx, shutdown_rx));
        Ok(ScaleLink {
            rx,
            control,
            shutdown: Some(shutdown),
            driver: Some(driver),
        })
    }
}

impl<C> ScaleLinkBuilder<Missing, C> {
    pub fn with_api(mut self, api: Arc<dyn ScaleApi>) -> ScaleLinkBuilder<Set, C> {
        self.api = Some(api);
        self.retag()
    }
}

impl<A> ScaleLinkBuilder<A, Missing> {
    pub fn with_connector(mut self, connector: Arc<dyn StreamConnector>) -> ScaleLinkBuilder<A, Set> {
        self.connector = Some(connector);
        self.retag()
    }
}

impl ScaleLinkBuilder<Set, Set> {
    pub fn start(self) -> Result<ScaleLink> {
        self.try_start()
    }
}
