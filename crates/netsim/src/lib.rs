//! Link-condition fault injection.
//!
//! [`ConditionsClient`] polls an external simulator for the current
//! latency, jitter, packet loss and link state. The helpers in [`fault`]
//! turn those figures into concrete delays and drop decisions.

pub mod client;
pub mod fault;

pub use client::{ConditionsClient, DEFAULT_TTL, NetsimError};
pub use fault::{drops_packet, link_down_backoff, sample_delay};
