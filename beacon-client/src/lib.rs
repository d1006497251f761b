//! Client side of the Beacon telemetry pipeline.
//!
//! A [`TelemetryClient`] records observations of the current session, drops them according to
//! the sampling configuration, replaces their paths with route templates and buffers them. Batches
//! are delivered by a [`Transport`], usually the [`HttpTransport`] posting to the ingest endpoint:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use beacon_client::{ClientConfig, HttpTransport, TelemetryClient};
//! use beacon_protocol::{EventKind, Metadata};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default();
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let client = TelemetryClient::new(config, transport)?;
//! let flusher = client.spawn_flusher();
//!
//! client.record(EventKind::RouteTransition, "/event/42", 310.0, Metadata::new());
//!
//! flusher.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Delivery is best effort. Failed batches are retried with exponential backoff a bounded number
//! of times, batches the server rejects as invalid are dropped right away, and nothing blocks the
//! code that records events.
#![warn(missing_docs)]

mod buffer;
mod client;
mod config;
mod session;
mod statsd;
mod transport;

#[cfg(test)]
mod testutils;

pub use self::buffer::*;
pub use self::client::*;
pub use self::config::*;
pub use self::session::*;
pub use self::transport::*;
