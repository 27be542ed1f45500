//! Audit logging module.
//!
//! Structured audit trail of every verification outcome, written as JSON
//! lines. Sender-supplied tokens are redacted or truncated before they are
//! written anywhere.

mod entry;
mod logger;
mod sanitize;

pub use entry::AuditEntry;
pub use logger::AuditLogger;
pub use sanitize::{redact_signature, truncate_token, MAX_TOKEN_LENGTH};
