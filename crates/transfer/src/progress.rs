//! Per-chunk throughput and ETA.

use std::time::Duration;

/// Progress figures derived from one ingested chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    /// Fraction of chunks received, in `[0, 1]`.
    pub progress: f64,
    /// Bytes per second for this chunk.
    pub speed: u64,
    /// Seconds until the remaining chunks land at the same pace.
    pub eta_secs: u64,
}

impl ChunkProgress {
    /// Computes progress after a chunk of `bytes` took `elapsed` wall time.
    ///
    /// Elapsed time is floored at 1 ms so an instantaneous chunk doesn't
    /// divide by zero.
    pub fn measure(bytes: usize, elapsed: Duration, received: usize, total: usize) -> Self {
        let elapsed_ms = elapsed.as_millis().max(1) as f64;
        let progress = if total == 0 {
            0.0
        } else {
            received as f64 / total as f64
        };
        let speed = (bytes as f64 / (elapsed_ms / 1000.0)).round() as u64;
        let remaining = total.saturating_sub(received) as f64;
        let eta_secs = ((remaining * elapsed_ms) / 1000.0).round() as u64;
        Self {
            progress,
            speed,
            eta_secs,
        }
    }
}
