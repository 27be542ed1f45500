//! hookgate library
//!
//! Verifies that inbound webhooks were signed by a holder of a shared secret,
//! have not been seen before and (optionally) were sent recently. The
//! [`pipeline::VerificationPipeline`] is usable in-process; the `hookgate`
//! binary serves it to a host HTTP layer over a Unix socket.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod protocol;
pub mod socket;
