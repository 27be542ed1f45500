//! Configuration module for the hookgate daemon.
//!
//! Handles loading and validating gateway configuration from TOML files.

mod settings;

pub use settings::*;
