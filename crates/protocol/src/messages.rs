use serde::{Deserialize, Serialize};

use crate::types::{Priority, TransferState};
use crate::{DEFAULT_CHUNK_SIZE, ProtocolError};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Manifest as posted by a client, before validation.
///
/// Every field is optional at the serde level so that a malformed manifest
/// surfaces as a [`ProtocolError`] with a useful message instead of a
/// generic deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub chunks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// A manifest that passed schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub transfer_id: Option<String>,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub chunks: Vec<String>,
    pub global_sha256: Option<String>,
    pub priority: Priority,
}

impl ManifestRequest {
    /// Checks required fields, enum membership, and chunk-count consistency.
    pub fn validate(self) -> Result<Manifest, ProtocolError> {
        let file_name = self
            .file_name
            .filter(|n| !n.is_empty())
            .ok_or(ProtocolError::MissingField("file_name"))?;
        let file_size = self
            .file_size
            .filter(|s| *s > 0)
            .ok_or(ProtocolError::MissingField("file_size"))?;
        let chunk_size = match self.chunk_size {
            None => DEFAULT_CHUNK_SIZE,
            Some(0) => return Err(ProtocolError::MissingField("chunk_size")),
            Some(n) => n,
        };
        if self.chunks.is_empty() {
            return Err(ProtocolError::EmptyChunks);
        }
        if let Some(i) = self.chunks.iter().position(|c| c.is_empty()) {
            return Err(ProtocolError::InvalidChunkDigest(i));
        }

        let expected = file_size.div_ceil(chunk_size);
        if expected != self.chunks.len() as u64 {
            return Err(ProtocolError::ChunkCountMismatch {
                expected,
                actual: self.chunks.len(),
            });
        }

        let priority = match self.priority.as_deref() {
            None => Priority::default(),
            Some(p) => p.parse()?,
        };

        Ok(Manifest {
            transfer_id: self.transfer_id.filter(|id| !id.is_empty()),
            file_name,
            file_size,
            chunk_size,
            chunks: self.chunks,
            global_sha256: self.global_sha256.filter(|g| !g.is_empty()),
            priority,
        })
    }
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Reply to a manifest: the indices the client still has to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestResponse {
    pub transfer_id: String,
    pub missing_chunks: Vec<usize>,
}

/// Acknowledges a persisted chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAck {
    pub index: usize,
    pub success: bool,
}

/// Public view of a transfer (no chunk digests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: usize,
    pub received_chunks: Vec<bool>,
    pub completed: bool,
    pub priority: Priority,
    pub transport: String,
    pub created_at: i64,
}

impl From<&TransferState> for TransferStatus {
    fn from(s: &TransferState) -> Self {
        Self {
            transfer_id: s.transfer_id.clone(),
            file_name: s.file_name.clone(),
            file_size: s.file_size,
            chunk_size: s.chunk_size,
            total_chunks: s.total_chunks,
            received_chunks: s.received_chunks.clone(),
            completed: s.completed,
            priority: s.priority,
            transport: s.transport.clone(),
            created_at: s.created_at,
        }
    }
}

/// Result of a successful completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub ok: bool,
    pub assembled_path: String,
    pub checksum: String,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            checksum: None,
            expected: None,
        }
    }
}

/// Per-priority values (limits, usage, queue lengths).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerClass<T> {
    pub high: T,
    pub medium: T,
    pub low: T,
}

impl<T> PerClass<T> {
    pub const fn new(high: T, medium: T, low: T) -> Self {
        Self { high, medium, low }
    }

    pub fn get(&self, p: Priority) -> &T {
        match p {
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    pub fn get_mut(&mut self, p: Priority) -> &mut T {
        match p {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }
}

/// Point-in-time view of the admission scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub limits: PerClass<usize>,
    pub usage: PerClass<usize>,
    pub waiting: PerClass<usize>,
    pub high_active: bool,
}
