//! Long running components of the server.

pub mod exporter;
pub mod server;
