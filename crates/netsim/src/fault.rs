//! Turning link conditions into delays and drops.
//!
//! Random draws are passed in as `u` in `[0, 1)` so the math stays
//! deterministic under test.

use std::time::Duration;

use sureroute_protocol::NetworkConditions;

/// Lower bound of the pause before a link-down rejection.
pub const LINK_DOWN_MIN_MS: u64 = 100;
/// Upper bound (exclusive) of the pause before a link-down rejection.
pub const LINK_DOWN_MAX_MS: u64 = 300;

/// Per-chunk delay: `latency + (u - 0.5) * jitter`, never negative.
pub fn sample_delay(conditions: &NetworkConditions, u: f64) -> Duration {
    let ms = conditions.latency_ms + (u - 0.5) * conditions.jitter_ms;
    if ms.is_finite() && ms > 0.0 {
        Duration::from_micros((ms * 1000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

/// Whether a chunk is lost for draw `u`.
pub fn drops_packet(conditions: &NetworkConditions, u: f64) -> bool {
    u < conditions.packet_loss
}

/// Pause before failing a chunk on a downed link, for draw `u`.
pub fn link_down_backoff(u: f64) -> Duration {
    let span = (LINK_DOWN_MAX_MS - LINK_DOWN_MIN_MS) as f64;
    let ms = LINK_DOWN_MIN_MS as f64 + u.clamp(0.0, 1.0) * span;
    Duration::from_millis(ms.min((LINK_DOWN_MAX_MS - 1) as f64) as u64)
}
