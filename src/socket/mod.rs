//! Unix socket server module.
//!
//! Serves the sidecar protocol: the host's HTTP layer hands each webhook to
//! the gateway over a local socket and gets back a verdict.

mod connection;
mod listener;

pub use connection::handle_connection;
pub use listener::{ConnectionMetrics, SocketListener, DRAIN_TIMEOUT};
