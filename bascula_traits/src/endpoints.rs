//! Paths of the backend surface the link depends on.

pub const READ_PATH: &str = "/api/scale/read";
pub const STATUS_PATH: &str = "/api/scale/status";
pub const TARE_PATH: &str = "/api/scale/tare";
pub const CALIBRATE_PATH: &str = "/api/scale/calibrate";
pub const STREAM_PATH: &str = "/ws/scale";
pub const HEALTH_PATH: &str = "/health";

/// Join a base URL and an absolute path without doubling the slash.
///
/// Base URLs may carry a path prefix (`http://pi/bascula`), so this is plain
/// concatenation rather than RFC 3986 resolution.
pub fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
