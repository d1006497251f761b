//! The Beacon binary.
//!
//! Beacon receives batches of browser telemetry (web vitals, route transitions and runtime
//! errors), rate limits and validates them, and exports them as low-cardinality metrics.
//!
//! # Usage
//!
//! ```text
//! beacon run --config .beacon --port 3000
//! beacon config show --format yaml
//! beacon config check
//! beacon healthcheck --mode ready
//! ```
//!
//! Every option of `run` can also be given through a `BEACON_*` environment variable.

mod cli;
mod cliapp;
mod healthcheck;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            beacon_log::ensure_error(&err);
            1
        }
    };

    beacon_log::shutdown();
    process::exit(exit_code);
}
