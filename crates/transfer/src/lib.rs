//! Chunk storage, integrity checks, and assembly for resumable transfers.
//!
//! The server side persists manifests and chunk blobs through
//! [`TransferStore`]; senders split files with [`ChunkReader`].

mod integrity;
mod locks;
mod progress;
mod reader;
mod store;
mod validation;

pub use integrity::{calculate_file_checksum, checksum_bytes, checksum_file, digests_match};
pub use locks::{TransferLockGuard, TransferLocks};
pub use progress::ChunkProgress;
pub use reader::{Chunk, ChunkReader, FileDigests, compute_file_digests};
pub use store::TransferStore;
pub use validation::validate_path_component;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state record error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("missing chunk {0}")]
    MissingChunk(usize),

    #[error("chunk index {index} out of range (total {total})")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("state record for {0} is inconsistent")]
    CorruptState(String),
}
