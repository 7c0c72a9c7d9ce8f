//! Presentation timestamp helpers
//!
//! Timestamps throughout the workspace are `f64` seconds. An unknown
//! timestamp (the "NO_PTS" sentinel of most container formats) is modelled
//! as `None`, so every arithmetic helper here is `Option`-aware.
//!
//! # Conversions
//!
//! Audio clocks advance by bytes written, so the byte/second helpers take a
//! bytes-per-second rate and, where it matters, an alignment (bytes per
//! sample frame) so that results never split a frame.

/// Presentation timestamp in seconds; `None` means unknown.
pub type Pts = Option<f64>;

/// Tolerance used when comparing two timestamps for equality.
pub const PTS_EPSILON: f64 = 1e-9;

/// Returns `Some(pts)` only for finite values.
///
/// Decoders occasionally emit NaN or infinity for broken streams; those are
/// treated exactly like a missing timestamp.
pub fn sanitize(pts: f64) -> Pts {
    if pts.is_finite() {
        Some(pts)
    } else {
        None
    }
}

/// Adds `delta` seconds to a timestamp, preserving "unknown".
pub fn offset(pts: Pts, delta: f64) -> Pts {
    pts.map(|p| p + delta)
}

/// Signed difference `a - b`, or `None` if either side is unknown.
pub fn diff(a: Pts, b: Pts) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a - b),
        _ => None,
    }
}

/// Converts a byte count at `bytes_per_second` into seconds.
pub fn bytes_to_seconds(bytes: usize, bytes_per_second: f64) -> f64 {
    if bytes_per_second <= 0.0 {
        return 0.0;
    }
    bytes as f64 / bytes_per_second
}

/// Converts seconds into a byte count, rounded down to a multiple of `align`.
///
/// Negative durations yield a negative count; callers that discard data use
/// the sign to pick the direction.
pub fn seconds_to_bytes(seconds: f64, bytes_per_second: f64, align: usize) -> i64 {
    let align = align.max(1) as i64;
    let raw = (seconds * bytes_per_second) as i64;
    raw / align * align
}

/// Formats a timestamp as `HH:MM:SS.mmm` for log output.
pub fn format_pts(pts: Pts) -> String {
    match pts {
        None => "--:--:--.---".to_string(),
        Some(p) => {
            let sign = if p < 0.0 { "-" } else { "" };
            let total_ms = (p.abs() * 1000.0).round() as u64;
            let ms = total_ms % 1000;
            let s = (total_ms / 1000) % 60;
            let m = (total_ms / 60_000) % 60;
            let h = total_ms / 3_600_000;
            format!("{}{:02}:{:02}:{:02}.{:03}", sign, h, m, s, ms)
        }
    }
}
