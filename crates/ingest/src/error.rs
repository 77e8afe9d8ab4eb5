use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sureroute_netsim::NetsimError;
use sureroute_protocol::ErrorBody;
use sureroute_transfer::TransferError;

/// Every way an ingest request can fail.
///
/// The `Display` text doubles as the `error` field of the HTTP body.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Malformed manifest or chunk request.
    #[error("{0}")]
    Validation(String),

    #[error("transfer not found")]
    NotFound,

    #[error("transfer already completed")]
    AlreadyCompleted,

    #[error("chunk hash mismatch")]
    ChunkHashMismatch,

    #[error("global checksum mismatch")]
    GlobalChecksumMismatch { checksum: String, expected: String },

    #[error("link down (simulated)")]
    LinkDown,

    #[error("simulated packet loss")]
    PacketLoss,

    #[error("missing chunks")]
    MissingChunks,

    /// A chunk recorded as received is gone from storage.
    #[error("assembly failed: chunk {0} missing from storage")]
    Assembly(usize),

    #[error("server shutting down")]
    ShuttingDown,

    #[error("storage error: {0}")]
    Storage(#[from] TransferError),

    #[error("{0}")]
    Simulator(#[from] NetsimError),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Validation(_)
            | IngestError::AlreadyCompleted
            | IngestError::ChunkHashMismatch
            | IngestError::GlobalChecksumMismatch { .. }
            | IngestError::MissingChunks => StatusCode::BAD_REQUEST,
            IngestError::NotFound => StatusCode::NOT_FOUND,
            IngestError::LinkDown | IngestError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::PacketLoss | IngestError::Assembly(_) | IngestError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            IngestError::Simulator(NetsimError::Disabled) => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::Simulator(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            IngestError::GlobalChecksumMismatch { checksum, expected } => ErrorBody {
                error: "global checksum mismatch".into(),
                checksum: Some(checksum),
                expected: Some(expected),
            },
            IngestError::Storage(e) => {
                tracing::error!("storage failure: {e}");
                ErrorBody::new("internal storage error")
            }
            other => ErrorBody::new(other.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
