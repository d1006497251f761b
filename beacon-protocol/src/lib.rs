//! The telemetry event model shared by the ingestion server and the client.
//!
//! Clients send batches of [`TelemetryEvent`]s as a JSON array. The server passes request bodies
//! through [`validate`], which enforces size limits before and during parsing, drops invalid
//! events and metadata fields, and returns an [`EventBatch`] that only contains well-formed
//! events.
#![warn(missing_docs)]

mod event;
mod pii;
mod session;
mod validation;

pub use event::*;
pub use pii::*;
pub use session::*;
pub use validation::*;
