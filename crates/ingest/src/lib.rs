//! Chunk ingest pipeline and its HTTP surface.
//!
//! [`Ingest`] runs manifest negotiation, per-chunk upload (admission,
//! fault injection, verification, persistence, progress events) and
//! completion. [`router`] exposes it over HTTP with axum.

mod error;
mod pipeline;
mod routes;

pub use error::IngestError;
pub use pipeline::{HIGH_PRIORITY_IDLE, Ingest};
pub use routes::{router, serve};
