//! WebSocket event fan-out.
//!
//! The ingest pipeline publishes [`Event`](sureroute_protocol::Event)s on an
//! [`EventBus`]; every WebSocket listener connected to the [`EventServer`]
//! receives them as JSON text frames. Delivery is at-most-once: a listener
//! that falls behind loses events instead of slowing the publisher.

mod bus;
mod connection;
mod server;

use std::time::Duration;

pub use bus::EventBus;
pub use server::{EventServer, ServerConfig};

/// Events buffered per listener before it starts losing them.
pub const EVENT_BUFFER_SIZE: usize = 1024;

/// Interval between keep-alive pings to each listener.
pub const PING_PERIOD: Duration = Duration::from_secs(30);

/// Largest frame accepted from a listener.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Errors produced by the event server.
#[derive(Debug, thiserror::Error)]
pub enum EventServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
