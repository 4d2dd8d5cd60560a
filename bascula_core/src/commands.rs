//! One-shot requests outside the live link: control actions and probes.

use std::time::Duration;

use bascula_traits::{BoxError, HttpReply, ScaleApi};

use crate::error::LinkError;
use crate::transport_error::map_transport_error;
use crate::wire::{
    Ack, Health, ReadOutcome, StatusOutcome, parse_ack, parse_health, parse_read_reply,
    parse_status_reply,
};

async fn bounded<F>(timeout: Duration, fut: F) -> Result<HttpReply, LinkError>
where
    F: std::future::Future<Output = Result<HttpReply, BoxError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(map_transport_error(e.as_ref())),
        Err(_) => Err(LinkError::Timeout),
    }
}

pub async fn read_once(api: &dyn ScaleApi, timeout: Duration) -> ReadOutcome {
    match bounded(timeout, api.read()).await {
        Ok(reply) => parse_read_reply(&reply),
        Err(e) => ReadOutcome::Failed(e),
    }
}

pub async fn status_once(api: &dyn ScaleApi, timeout: Duration) -> StatusOutcome {
    match bounded(timeout, api.status()).await {
        Ok(reply) => parse_status_reply(&reply),
        Err(e) => StatusOutcome::Failed(e),
    }
}

pub async fn tare(api: &dyn ScaleApi, timeout: Duration) -> Result<Ack, LinkError> {
    tracing::info!("tare requested");
    parse_ack(&bounded(timeout, api.tare()).await?)
}

/// Calibrate against a reference load of `known_grams` sitting on the pan.
pub async fn calibrate(
    api: &dyn ScaleApi,
    known_grams: f64,
    timeout: Duration,
) -> Result<Ack, LinkError> {
    if !(known_grams.is_finite() && known_grams > 0.0) {
        return Err(LinkError::State(format!(
            "reference weight must be a positive number of grams, got {known_grams}"
        )));
    }
    tracing::info!(known_grams, "calibration requested");
    parse_ack(&bounded(timeout, api.calibrate(known_grams)).await?)
}

pub async fn health(api: &dyn ScaleApi, timeout: Duration) -> Result<Health, LinkError> {
    parse_health(&bounded(timeout, api.health()).await?)
}
