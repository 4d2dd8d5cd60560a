use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bascula_core::commands;
use bascula_core::wire::ReadOutcome;
use bascula_core::LinkError;
use bascula_traits::{BoxError, HttpReply, ScaleApi};

const T: Duration = Duration::from_secs(1);

#[derive(Default)]
struct RecordingApi {
    calibrations: Mutex<Vec<f64>>,
    reject_tare: bool,
}

#[async_trait]
impl ScaleApi for RecordingApi {
    async fn read(&self) -> Result<HttpReply, BoxError> {
        Ok(HttpReply::ok(r#"{"ok":true,"grams":42.5,"stable":true,"success":true}"#))
    }
    async fn status(&self) -> Result<HttpReply, BoxError> {
        Err(Box::new(std::io::Error::other("Connection refused")))
    }
    async fn tare(&self) -> Result<HttpReply, BoxError> {
        if self.reject_tare {
            Ok(HttpReply::ok(r#"{"ok":false,"reason":"service_not_initialized"}"#))
        } else {
            Ok(HttpReply::ok(r#"{"ok":true}"#))
        }
    }
    async fn calibrate(&self, known_grams: f64) -> Result<HttpReply, BoxError> {
        self.calibrations.lock().unwrap().push(known_grams);
        Ok(HttpReply::ok(r#"{"ok":true,"message":"calibrated"}"#))
    }
}

#[tokio::test]
async fn one_shot_read_parses_reply() {
    let api = RecordingApi::default();
    match commands::read_once(&api, T).await {
        ReadOutcome::Reading(u) => {
            assert_eq!(u.weight, Some(42.5));
            assert_eq!(u.stable, Some(true));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn refused_status_is_typed() {
    let api = RecordingApi::default();
    let out = commands::status_once(&api, T).await;
    assert!(matches!(
        out,
        bascula_core::wire::StatusOutcome::Failed(LinkError::Refused(_))
    ));
}

#[tokio::test]
async fn tare_rejection_carries_reason() {
    let api = RecordingApi {
        reject_tare: true,
        ..RecordingApi::default()
    };
    assert_eq!(
        commands::tare(&api, T).await,
        Err(LinkError::Rejected("service_not_initialized".into()))
    );
}

#[tokio::test]
async fn calibrate_validates_before_sending() {
    let api = RecordingApi::default();
    assert!(matches!(
        commands::calibrate(&api, -5.0, T).await,
        Err(LinkError::State(_))
    ));
    assert!(matches!(
        commands::calibrate(&api, f64::NAN, T).await,
        Err(LinkError::State(_))
    ));
    let ack = commands::calibrate(&api, 500.0, T).await.expect("ack");
    assert_eq!(ack.message.as_deref(), Some("calibrated"));
    assert_eq!(*api.calibrations.lock().unwrap(), vec![500.0]);
}

#[tokio::test]
async fn default_health_reports_missing_route() {
    let api = RecordingApi::default();
    assert!(matches!(
        commands::health(&api, T).await,
        Err(LinkError::NotFound(_))
    ));
}
