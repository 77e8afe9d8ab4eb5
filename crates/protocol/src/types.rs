use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Priority class of a transfer.
///
/// Governs how many chunk uploads of the transfer may run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    /// All classes, highest first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(ProtocolError::InvalidPriority(other.to_string())),
        }
    }
}

/// Durable record of a single transfer.
///
/// `chunks` and `received_chunks` are index-aligned and always the same
/// length as `total_chunks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: usize,
    pub chunks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_sha256: Option<String>,
    pub priority: Priority,
    pub received_chunks: Vec<bool>,
    pub completed: bool,
    pub transport: String,
    pub created_at: i64,
}

impl TransferState {
    /// Number of chunks persisted so far.
    pub fn received_count(&self) -> usize {
        self.received_chunks.iter().filter(|r| **r).count()
    }

    /// Indices that still need to be uploaded, ascending.
    pub fn missing_chunks(&self) -> Vec<usize> {
        self.received_chunks
            .iter()
            .enumerate()
            .filter_map(|(i, r)| (!*r).then_some(i))
            .collect()
    }

    /// Returns `true` when every chunk has been received.
    pub fn all_received(&self) -> bool {
        self.received_chunks.iter().all(|r| *r)
    }

    /// Fraction of chunks received, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.received_count() as f64 / self.total_chunks as f64
    }
}

/// Simulated link conditions reported by the fault injector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkConditions {
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub jitter_ms: f64,
    #[serde(default)]
    pub packet_loss: f64,
    #[serde(default)]
    pub down: bool,
}

impl NetworkConditions {
    /// Clamps values into their valid ranges.
    ///
    /// Latency and jitter are non-negative; packet loss is a probability.
    pub fn sanitized(self) -> Self {
        let finite_or_zero = |v: f64| if v.is_finite() { v } else { 0.0 };
        Self {
            latency_ms: finite_or_zero(self.latency_ms).max(0.0),
            jitter_ms: finite_or_zero(self.jitter_ms).max(0.0),
            packet_loss: finite_or_zero(self.packet_loss).clamp(0.0, 1.0),
            down: self.down,
        }
    }
}

/// Partial update posted to the conditions source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<bool>,
}
