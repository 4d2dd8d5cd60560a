//! Parsers for the backend's JSON shapes.
//!
//! The backend is loose about field names (`grams` on the read endpoint,
//! `weight` on the socket, `stable` sometimes missing). Everything is
//! normalized here so the coordinator never branches on payload shape.

use bascula_traits::HttpReply;
use serde::Deserialize;

use crate::error::LinkError;
use crate::reading::Unit;

/// Normalized partial update. Absent fields leave the published value as is.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScaleUpdate {
    pub weight: Option<f64>,
    pub unit: Option<Unit>,
    /// Backend verdict; `None` lets the local estimator decide.
    pub stable: Option<bool>,
}

/// Result of one read-cycle request.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// `ok=true` with a weight.
    Reading(ScaleUpdate),
    /// `ok=false`; the backend's reason.
    Rejected { reason: String },
    /// HTTP 404: the backend has no read route.
    EndpointMissing,
    /// Transport failure or non-200 status.
    Failed(LinkError),
    /// 200 with a body we could not use.
    Malformed(String),
}

/// Result of one status-cycle request.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Online,
    Offline { reason: Option<String> },
    Failed(LinkError),
    Malformed(String),
}

/// Parsed socket frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Update(ScaleUpdate),
    /// The backend is reachable but its scale service is not.
    Fault { reason: String },
}

#[derive(Debug, Deserialize)]
struct ReadBody {
    ok: bool,
    grams: Option<f64>,
    weight: Option<f64>,
    stable: Option<bool>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    ok: bool,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameBody {
    ok: Option<bool>,
    weight: Option<f64>,
    grams: Option<f64>,
    stable: Option<bool>,
    unit: Option<Unit>,
    reason: Option<String>,
}

fn object<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, String> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

pub fn parse_read_reply(reply: &HttpReply) -> ReadOutcome {
    match reply.status {
        200 => {}
        404 => return ReadOutcome::EndpointMissing,
        other => return ReadOutcome::Failed(LinkError::Transport(format!("HTTP {other}"))),
    }
    let body: ReadBody = match object(&reply.body) {
        Ok(b) => b,
        Err(e) => return ReadOutcome::Malformed(e),
    };
    if !body.ok {
        return ReadOutcome::Rejected {
            reason: body.reason.unwrap_or_else(|| "unknown".to_string()),
        };
    }
    match body.grams.or(body.weight) {
        Some(w) if w.is_finite() => ReadOutcome::Reading(ScaleUpdate {
            weight: Some(w),
            unit: None,
            stable: body.stable,
        }),
        _ => ReadOutcome::Malformed("ok reading without weight".to_string()),
    }
}

pub fn parse_status_reply(reply: &HttpReply) -> StatusOutcome {
    match reply.status {
        200 => {}
        404 => {
            return StatusOutcome::Failed(LinkError::NotFound(
                "status endpoint not found".to_string(),
            ));
        }
        other => return StatusOutcome::Failed(LinkError::Transport(format!("HTTP {other}"))),
    }
    match object::<StatusBody>(&reply.body) {
        Ok(b) if b.ok => StatusOutcome::Online,
        Ok(b) => StatusOutcome::Offline { reason: b.reason },
        Err(e) => StatusOutcome::Malformed(e),
    }
}

/// Parse one text frame. Partial frames are fine; `{}` is an empty update.
pub fn parse_frame(text: &str) -> Result<StreamUpdate, LinkError> {
    let body: FrameBody = object(text).map_err(LinkError::Protocol)?;
    if body.ok == Some(false) {
        return Ok(StreamUpdate::Fault {
            reason: body.reason.unwrap_or_else(|| "unknown".to_string()),
        });
    }
    Ok(StreamUpdate::Update(ScaleUpdate {
        weight: body.weight.or(body.grams),
        unit: body.unit,
        stable: body.stable,
    }))
}

#[derive(Debug, Deserialize)]
struct AckBody {
    ok: bool,
    message: Option<String>,
    reason: Option<String>,
}

/// Answer to a control request (tare, calibrate).
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct Ack {
    pub message: Option<String>,
}

/// Parse the reply to a control request. `ok=false` becomes `Rejected`.
pub fn parse_ack(reply: &HttpReply) -> Result<Ack, LinkError> {
    match reply.status {
        200 => {}
        404 => return Err(LinkError::NotFound("control endpoint not found".to_string())),
        other => return Err(LinkError::Transport(format!("HTTP {other}"))),
    }
    let body: AckBody = object(&reply.body).map_err(LinkError::Protocol)?;
    if body.ok {
        Ok(Ack {
            message: body.message,
        })
    } else {
        Err(LinkError::Rejected(
            body.reason
                .or(body.message)
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub scale_connected: bool,
}

pub fn parse_health(reply: &HttpReply) -> Result<Health, LinkError> {
    match reply.status {
        200 => object(&reply.body).map_err(LinkError::Protocol),
        404 => Err(LinkError::NotFound("health endpoint not found".to_string())),
        other => Err(LinkError::Transport(format!("HTTP {other}"))),
    }
}
