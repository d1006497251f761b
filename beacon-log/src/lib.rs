//! Error reporting and logging for Beacon.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`] and a [`SentryConfig`]
//! while the `init` feature is enabled. Until then, log events are discarded and errors passed to
//! [`ensure_error`] are printed to `stderr`.
//!
//! ```
//! # #[cfg(feature = "init")] {
//! let log_config = beacon_log::LogConfig::default();
//! let sentry_config = beacon_log::SentryConfig::default();
//!
//! beacon_log::init(&log_config, &sentry_config);
//! # }
//! ```
//!
//! # Logging
//!
//! Log through the re-exported `tracing` macros. Attach errors as structured fields instead of
//! formatting them into the message, so that their source chain is preserved:
//!
//! ```
//! let error = std::io::Error::other("connection refused");
//! beacon_log::error!(
//!     error = &error as &dyn std::error::Error,
//!     "failed to deliver metrics"
//! );
//! ```
//!
//! Telemetry payloads are client controlled. Never log raw event content, only structural
//! information such as counts, reason codes or normalized templates.
//!
//! # Testing
//!
//! Call [`init_test!`] at the start of a test to capture log output of the calling crate.
#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
