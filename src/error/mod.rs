//! Error types for the hookgate gateway.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
