//! Human-readable error descriptions and structured JSON error formatting.

use bascula_core::error::{BuildError, LinkError};
use bascula_http::HttpError;

/// Prefix the CLI puts on config load and validation failures.
pub const CONFIG_CONTEXT: &str = "invalid configuration";

fn is_config_error(err: &eyre::Report) -> bool {
    err.chain().any(|c| {
        let m = c.to_string();
        m.starts_with(CONFIG_CONTEXT) || m.starts_with("read config") || m.starts_with("parse config")
    })
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(le) = err.downcast_ref::<LinkError>() {
        return match le {
            LinkError::Refused(detail) => format!(
                "What happened: Could not reach the scale backend ({detail}).\nLikely causes: Backend not running, wrong host or port.\nHow to fix: Start the backend or pass --backend-url (or set BACKEND_BASE_URL)."
            ),
            LinkError::Timeout => "What happened: The scale backend did not answer in time.\nLikely causes: Backend overloaded, network trouble, or request timeout too low.\nHow to fix: Check the backend, or raise backend.request_timeout_ms in the config.".to_string(),
            LinkError::Transport(detail) => format!(
                "What happened: Request to the scale backend failed ({detail}).\nLikely causes: Network trouble or a backend error.\nHow to fix: Check the backend logs, then retry."
            ),
            LinkError::NotFound(detail) => format!(
                "What happened: The backend has no such endpoint ({detail}).\nLikely causes: Backend version does not match this client.\nHow to fix: Update the backend, or point --backend-url at a compatible one."
            ),
            LinkError::Rejected(reason) => format!(
                "What happened: The backend refused the request: {reason}.\nLikely causes: Scale offline, or the pan was not ready for this action.\nHow to fix: Check the scale, follow the reason above, then retry."
            ),
            LinkError::State(detail) => format!(
                "What happened: {detail}.\nLikely causes: An argument out of range.\nHow to fix: Fix the value and retry."
            ),
            LinkError::Protocol(detail) => format!(
                "What happened: The backend sent a reply this client cannot use ({detail}).\nLikely causes: Backend version mismatch.\nHow to fix: Update the backend or this client."
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingApi | BuildError::MissingConnector => format!(
                "What happened: The link was started without transports ({be}).\nLikely causes: Internal wiring error.\nHow to fix: Re-run with --demo or --sim to narrow it down, and report the bug."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `bascula self-check`."
            ),
        };
    }

    if let Some(HttpError::InvalidUrl(detail)) = err.downcast_ref::<HttpError>() {
        return format!(
            "What happened: Backend URL is not usable ({detail}).\nLikely causes: Typo in --backend-url, BACKEND_BASE_URL or backend.base_url.\nHow to fix: Use a full URL such as http://127.0.0.1:8081."
        );
    }

    if is_config_error(err) {
        let root = err.root_cause();
        return format!(
            "What happened: Configuration is invalid or unreadable ({root}).\nLikely causes: Missing file, TOML syntax error, or out-of-range values.\nHow to fix: Edit the TOML config, then rerun `bascula self-check`."
        );
    }

    // Generic fallback
    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable process exit codes. Clap usage errors exit with 2 on their own.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(le) = err.downcast_ref::<LinkError>() {
        return match le {
            LinkError::Refused(_) | LinkError::Timeout | LinkError::Transport(_) => 3,
            LinkError::NotFound(_) => 4,
            LinkError::Rejected(_) | LinkError::State(_) => 5,
            LinkError::Protocol(_) => 6,
        };
    }
    if err.downcast_ref::<BuildError>().is_some()
        || matches!(err.downcast_ref::<HttpError>(), Some(HttpError::InvalidUrl(_)))
        || is_config_error(err)
    {
        return 2;
    }
    1
}

/// Short machine-readable name for the error class.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(le) = err.downcast_ref::<LinkError>() {
        return match le {
            LinkError::Refused(_) => "Unreachable",
            LinkError::Timeout => "Timeout",
            LinkError::Transport(_) => "Transport",
            LinkError::NotFound(_) => "EndpointMissing",
            LinkError::Rejected(_) => "Rejected",
            LinkError::State(_) => "InvalidArgument",
            LinkError::Protocol(_) => "Protocol",
        };
    }
    if exit_code_for_error(err) == 2 {
        return "InvalidConfig";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "message": humanize(err),
        "exit_code": exit_code_for_error(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(LinkError::Refused("connection refused".into()), 3, "Could not reach")]
    #[case(LinkError::Timeout, 3, "did not answer in time")]
    #[case(LinkError::NotFound("/api/scale/read".into()), 4, "no such endpoint")]
    #[case(LinkError::Rejected("scale offline".into()), 5, "scale offline")]
    #[case(LinkError::Protocol("bad json".into()), 6, "cannot use")]
    fn link_errors_are_typed(#[case] e: LinkError, #[case] code: i32, #[case] needle: &str) {
        let report = eyre::Report::new(e);
        assert_eq!(exit_code_for_error(&report), code);
        assert!(humanize(&report).contains(needle), "{}", humanize(&report));
    }

    #[test]
    fn config_context_is_recognized() {
        let report = eyre::eyre!("polling.read_ms must be > 0").wrap_err(CONFIG_CONTEXT);
        assert_eq!(exit_code_for_error(&report), 2);
        let text = humanize(&report);
        assert!(text.starts_with("What happened: Configuration"), "{text}");
        assert!(text.contains("polling.read_ms"), "{text}");
    }

    #[test]
    fn json_error_has_reason_and_message() {
        let report = eyre::Report::new(LinkError::Timeout);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&report)).unwrap();
        assert_eq!(v["reason"], "Timeout");
        assert_eq!(v["exit_code"], 3);
        assert!(v["message"].as_str().unwrap().starts_with("What happened"));
    }

    #[test]
    fn unknown_errors_fall_back() {
        let report = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&report), 1);
        assert!(humanize(&report).contains("Original: boom"));
        assert_eq!(reason_name(&report), "Error");
    }
}
