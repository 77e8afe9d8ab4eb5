//! HTTP API over the ingest pipeline.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use sureroute_protocol::{
    CHUNK_HASH_HEADER, ChunkAck, CompleteResponse, ConditionsUpdate, ManifestRequest,
    ManifestResponse, NetworkConditions, SchedulerSnapshot, TransferStatus,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{Ingest, IngestError};

type Shared = Arc<Ingest>;

/// Builds the transfer API. Request bodies are capped at `max_body_bytes`.
pub fn router(ingest: Shared, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/transfer/manifest", post(manifest))
        .route("/transfer/{id}/chunk/{index}", post(upload_chunk))
        .route("/transfer/{id}/status", get(status))
        .route("/transfer/{id}/complete", post(complete))
        .route("/scheduler", get(scheduler))
        .route("/simulator/conditions", post(update_conditions))
        .route("/simulator/down/{state}", post(set_link_down))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(ingest)
}

/// Serves `router` on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("transfer API listening on {addr}");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

async fn manifest(
    State(ingest): State<Shared>,
    body: Result<Json<ManifestRequest>, JsonRejection>,
) -> Result<Json<ManifestResponse>, IngestError> {
    let Json(req) = body.map_err(|e| IngestError::Validation(format!("invalid manifest: {e}")))?;
    Ok(Json(ingest.manifest(req).await?))
}

async fn upload_chunk(
    State(ingest): State<Shared>,
    Path((id, index)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkAck>, IngestError> {
    let hash = headers
        .get(CHUNK_HASH_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(Json(ingest.upload_chunk(&id, &index, hash, &body).await?))
}

async fn status(
    State(ingest): State<Shared>,
    Path(id): Path<String>,
) -> Result<Json<TransferStatus>, IngestError> {
    Ok(Json(ingest.status(&id).await?))
}

async fn complete(
    State(ingest): State<Shared>,
    Path(id): Path<String>,
) -> Result<Json<CompleteResponse>, IngestError> {
    Ok(Json(ingest.complete(&id).await?))
}

async fn scheduler(State(ingest): State<Shared>) -> Result<Json<SchedulerSnapshot>, IngestError> {
    Ok(Json(ingest.scheduler_snapshot().await?))
}

async fn update_conditions(
    State(ingest): State<Shared>,
    body: Result<Json<ConditionsUpdate>, JsonRejection>,
) -> Result<Json<NetworkConditions>, IngestError> {
    let Json(patch) = body.map_err(|e| IngestError::Validation(format!("invalid conditions: {e}")))?;
    Ok(Json(ingest.update_conditions(&patch).await?))
}

async fn set_link_down(
    State(ingest): State<Shared>,
    Path(state): Path<String>,
) -> Result<Json<NetworkConditions>, IngestError> {
    Ok(Json(ingest.set_link_down(&state).await?))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
