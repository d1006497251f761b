//! Common functionality for Beacon.
#![warn(missing_docs)]

mod retry;
mod time;

pub use retry::*;
pub use time::*;
