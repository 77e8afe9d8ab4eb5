use serde::{Deserialize, Serialize};

use crate::types::Priority;

/// Link metrics observed while ingesting one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub transfer_id: String,
    pub rtt_ms: f64,
    pub packet_loss: f64,
    pub priority: Priority,
    /// Bytes per second for the chunk that produced this sample.
    pub speed: u64,
}

/// Progress of a transfer after a manifest, chunk, or completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferUpdateEvent {
    pub transfer_id: String,
    pub progress: f64,
    pub speed: u64,
    pub eta_secs: Option<u64>,
    pub priority: Priority,
    pub transport: String,
}

/// Frames pushed to event-channel listeners.
///
/// Serialized as a flat JSON object with a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "connected")]
    Connected { ok: bool },
    #[serde(rename = "telemetry")]
    Telemetry(TelemetryEvent),
    #[serde(rename = "transfer:update")]
    TransferUpdate(TransferUpdateEvent),
}

impl Event {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::Telemetry(_) => "telemetry",
            Event::TransferUpdate(_) => "transfer:update",
        }
    }
}
