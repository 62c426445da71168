//! Server clock baseline.
//!
//! Every `serverTime` and `anchorTime` on the wire comes from [`now_ms`], so all
//! clients measure drift against the same reference.

use chrono::Utc;

/// Current server timestamp, milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Playback position expected at `now`, given the anchor it was recorded at.
///
/// `anchor + (now - anchor_time) / 1000 * rate`, no clamping.
pub fn extrapolate(anchor: f64, anchor_time: i64, now: i64, rate: f64) -> f64 {
    anchor + diff_seconds(now, anchor_time) * rate
}

pub fn diff_ms(a: i64, b: i64) -> i64 { a - b }

pub fn diff_seconds(a: i64, b: i64) -> f64 { diff_ms(a, b) as f64 / 1000.0 }
