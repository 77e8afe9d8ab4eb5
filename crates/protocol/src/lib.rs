//! Wire types shared by the SureRoute server, its event channel, and clients.
//!
//! All JSON uses `snake_case` field names.

pub mod events;
pub mod messages;
pub mod types;

pub use events::{Event, TelemetryEvent, TransferUpdateEvent};
pub use messages::{
    ChunkAck, CompleteResponse, ErrorBody, Manifest, ManifestRequest, ManifestResponse, PerClass,
    SchedulerSnapshot, TransferStatus,
};
pub use types::{ConditionsUpdate, NetworkConditions, Priority, TransferState};

/// Chunk size assumed when a manifest omits it: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Header carrying the hex SHA-256 of a chunk body.
pub const CHUNK_HASH_HEADER: &str = "x-chunk-hash";

/// Transport label recorded on new transfers.
pub const DEFAULT_TRANSPORT: &str = "wifi";

/// Manifest and request validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid manifest: missing or empty {0}")]
    MissingField(&'static str),

    #[error("invalid manifest: chunks must not be empty")]
    EmptyChunks,

    #[error("invalid manifest: empty digest for chunk {0}")]
    InvalidChunkDigest(usize),

    #[error("invalid manifest: expected {expected} chunks, got {actual}")]
    ChunkCountMismatch { expected: u64, actual: usize },

    #[error("invalid priority: {0}")]
    InvalidPriority(String),
}
