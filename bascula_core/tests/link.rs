//! End-to-end link tests against scripted transports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bascula_core::coordinator::STREAM_ENDPOINT_MISSING;
use bascula_core::{
    BackoffPolicy, BuildError, ConnectionState, CoordinatorCfg, DemoReading, LinkCfg, ScaleLink,
    Unit, WeightReading,
};
use bascula_traits::{BoxError, Frame, FrameSource, HttpReply, ScaleApi, StreamConnector};
use tokio::sync::{mpsc, watch};

type FrameTx = mpsc::UnboundedSender<Result<Frame, BoxError>>;

struct FixedApi {
    grams: f64,
}

#[async_trait]
impl ScaleApi for FixedApi {
    async fn read(&self) -> Result<HttpReply, BoxError> {
        Ok(HttpReply::ok(format!(r#"{{"ok":true,"grams":{}}}"#, self.grams)))
    }
    async fn status(&self) -> Result<HttpReply, BoxError> {
        Ok(HttpReply::ok(r#"{"ok":true}"#))
    }
    async fn tare(&self) -> Result<HttpReply, BoxError> {
        Ok(HttpReply::ok(r#"{"ok":true}"#))
    }
    async fn calibrate(&self, _known_grams: f64) -> Result<HttpReply, BoxError> {
        Ok(HttpReply::ok(r#"{"ok":true}"#))
    }
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<Frame, BoxError>>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, BoxError>> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, Copy)]
enum Plan {
    Accept,
    NotFound,
}

/// Follows its plan, then refuses every further connect.
struct ScriptedConnector {
    plan: Mutex<VecDeque<Plan>>,
    connects: AtomicUsize,
    sockets: mpsc::UnboundedSender<FrameTx>,
}

impl ScriptedConnector {
    fn new(plan: &[Plan]) -> (Arc<Self>, mpsc::UnboundedReceiver<FrameTx>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let c = Arc::new(Self {
            plan: Mutex::new(plan.iter().copied().collect()),
            connects: AtomicUsize::new(0),
            sockets: tx,
        });
        (c, rx)
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn FrameSource>, BoxError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.plan.lock().unwrap().pop_front();
        match next {
            Some(Plan::Accept) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = self.sockets.send(tx);
                Ok(Box::new(ChannelSource { rx }))
            }
            Some(Plan::NotFound) => Err(Box::new(std::io::Error::other("HTTP error: 404 Not Found"))),
            None => Err(Box::new(std::io::Error::other("Connection refused (os error 111)"))),
        }
    }
}

fn cfg() -> LinkCfg {
    LinkCfg {
        coordinator: CoordinatorCfg {
            backoff: BackoffPolicy {
                jitter: Duration::ZERO,
                ..BackoffPolicy::default()
            },
            ..CoordinatorCfg::default()
        },
        ..LinkCfg::default()
    }
}

async fn wait_until<F>(rx: &mut watch::Receiver<WeightReading>, secs: u64, f: F) -> WeightReading
where
    F: FnMut(&WeightReading) -> bool,
{
    tokio::time::timeout(Duration::from_secs(secs), rx.wait_for(f))
        .await
        .expect("timed out waiting for reading")
        .expect("link dropped")
        .clone()
}

fn text(s: &str) -> Result<Frame, BoxError> {
    Ok(Frame::Text(s.to_string()))
}

#[tokio::test]
async fn stream_frames_reach_subscribers() {
    let (connector, mut sockets) = ScriptedConnector::new(&[Plan::Accept]);
    let mut link = ScaleLink::builder()
        .with_api(Arc::new(FixedApi { grams: 0.0 }))
        .with_connector(connector)
        .with_config(cfg())
        .start()
        .expect("start");
    let mut rx = link.subscribe();

    let socket = sockets.recv().await.expect("socket");
    socket
        .send(text(r#"{"weight":12.0,"unit":"ml","stable":true}"#))
        .expect("send");

    let r = wait_until(&mut rx, 5, |r| r.weight == 12.0).await;
    assert_eq!(r.state, ConnectionState::Streaming);
    assert_eq!(r.unit, Unit::Ml);
    assert!(r.stable && r.connected);

    link.stop().await;
}

#[tokio::test(start_paused = true)]
async fn closed_stream_is_bridged_by_polling_then_restored() {
    let (connector, mut sockets) = ScriptedConnector::new(&[Plan::Accept, Plan::Accept]);
    let mut link = ScaleLink::builder()
        .with_api(Arc::new(FixedApi { grams: 33.0 }))
        .with_connector(connector.clone())
        .with_config(cfg())
        .start()
        .expect("start");
    let mut rx = link.subscribe();

    let first = sockets.recv().await.expect("first socket");
    first.send(text(r#"{"weight":5.0}"#)).expect("send");
    wait_until(&mut rx, 5, |r| r.weight == 5.0).await;
    drop(first);

    let r = wait_until(&mut rx, 5, |r| r.weight == 33.0).await;
    assert_eq!(r.state, ConnectionState::Reconnecting);
    assert_eq!(r.reconnect_attempts, 1);
    assert!(r.connected);

    let second = sockets.recv().await.expect("second socket");
    let r = wait_until(&mut rx, 5, |r| r.state == ConnectionState::Streaming).await;
    assert_eq!(r.reconnect_attempts, 0);
    second.send(text(r#"{"weight":7.5}"#)).expect("send");
    wait_until(&mut rx, 5, |r| r.weight == 7.5).await;
    assert_eq!(connector.connects(), 2);

    link.stop().await;
}

#[tokio::test(start_paused = true)]
async fn refused_stream_exhausts_into_polling_fallback() {
    let (connector, _sockets) = ScriptedConnector::new(&[]);
    let mut link = ScaleLink::builder()
        .with_api(Arc::new(FixedApi { grams: 2.0 }))
        .with_connector(connector.clone())
        .with_config(cfg())
        .start()
        .expect("start");
    let mut rx = link.subscribe();

    let r = wait_until(&mut rx, 600, |r| r.state == ConnectionState::PollingFallback).await;
    assert_eq!(r.reconnect_attempts, 10);
    assert_eq!(connector.connects(), 11);
    let r = wait_until(&mut rx, 5, |r| r.weight == 2.0 && r.connected).await;
    assert!(r.error.is_some());

    link.stop().await;
}

#[tokio::test(start_paused = true)]
async fn handshake_404_falls_back_without_retrying() {
    let (connector, _sockets) = ScriptedConnector::new(&[Plan::NotFound]);
    let mut link = ScaleLink::builder()
        .with_api(Arc::new(FixedApi { grams: 4.0 }))
        .with_connector(connector.clone())
        .with_config(cfg())
        .start()
        .expect("start");
    let mut rx = link.subscribe();

    let r = wait_until(&mut rx, 5, |r| r.state == ConnectionState::PollingFallback).await;
    assert_eq!(r.error.as_deref(), Some(STREAM_ENDPOINT_MISSING));
    wait_until(&mut rx, 5, |r| r.weight == 4.0).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.connects(), 1);
    link.stop().await;
}

#[tokio::test]
async fn demo_reading_is_published_before_start_returns() {
    let mut link = ScaleLink::builder()
        .with_config(LinkCfg {
            coordinator: CoordinatorCfg {
                demo: Some(DemoReading {
                    weight: 120.0,
                    unit: Unit::G,
                }),
                ..CoordinatorCfg::default()
            },
            ..LinkCfg::default()
        })
        .try_start()
        .expect("demo needs no transports");

    let r = link.reading();
    assert_eq!(r.weight, 120.0);
    assert!(r.stable && r.connected);
    link.stop().await;
}

#[tokio::test]
async fn stop_publishes_default_and_is_idempotent() {
    let (connector, mut sockets) = ScriptedConnector::new(&[Plan::Accept]);
    let mut link = ScaleLink::builder()
        .with_api(Arc::new(FixedApi { grams: 0.0 }))
        .with_connector(connector)
        .with_config(cfg())
        .start()
        .expect("start");
    let mut rx = link.subscribe();
    let socket = sockets.recv().await.expect("socket");
    socket.send(text(r#"{"weight":9.0}"#)).expect("send");
    wait_until(&mut rx, 5, |r| r.weight == 9.0).await;

    link.stop().await;
    assert!(!link.is_running());
    assert_eq!(link.reading(), WeightReading::default());
    link.stop().await;
    assert_eq!(link.reading(), WeightReading::default());
}

#[tokio::test]
async fn missing_transports_are_build_errors() {
    let err = ScaleLink::builder()
        .with_connector(ScriptedConnector::new(&[]).0)
        .try_start()
        .expect_err("api is required");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingApi)
    ));

    let err = ScaleLink::builder()
        .with_api(Arc::new(FixedApi { grams: 0.0 }))
        .try_start()
        .expect_err("connector is required");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingConnector)
    ));
}

#[tokio::test]
async fn zero_poll_interval_is_rejected() {
    let mut bad = cfg();
    bad.polling.read_every = Duration::ZERO;
    let err = ScaleLink::builder()
        .with_api(Arc::new(FixedApi { grams: 0.0 }))
        .with_connector(ScriptedConnector::new(&[]).0)
        .with_config(bad)
        .start()
        .expect_err("invalid config");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}
