//! Maps `Box<dyn Error>` from trait boundaries to typed `LinkError`.
//!
//! The traits in `bascula_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `bascula_http::HttpError` downcasting.

use crate::error::LinkError;

/// Map a trait-boundary error to a typed `LinkError`.
///
/// Attempts to downcast known transport error types first, then falls back
/// to string-based heuristics.
pub fn map_transport_error(e: &(dyn std::error::Error + 'static)) -> LinkError {
    #[cfg(feature = "http-errors")]
    {
        use bascula_http::error::HttpError;
        if let Some(http) = e.downcast_ref::<HttpError>() {
            return match http {
                HttpError::Timeout => LinkError::Timeout,
                HttpError::Connect(msg) => LinkError::Refused(msg.clone()),
                HttpError::Handshake { status: 404 } => {
                    LinkError::NotFound("stream handshake returned 404".to_string())
                }
                other => LinkError::Transport(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        LinkError::Timeout
    } else if lower.contains("404") || lower.contains("not found") {
        LinkError::NotFound(s)
    } else if lower.contains("refused") {
        LinkError::Refused(s)
    } else {
        LinkError::Transport(s)
    }
}
