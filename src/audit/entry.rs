//! Audit entry types.
//!
//! Defines the structure of audit log entries.

use serde::Serialize;
use uuid::Uuid;

use crate::error::RejectReason;
use crate::events::VerificationEvent;

use super::sanitize::truncate_token;

/// A single audit log entry, one per verification.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// RFC 3339 timestamp of the verification.
    pub timestamp: String,
    /// Unique identifier for the request.
    pub request_id: Uuid,
    /// `accepted` or `rejected`.
    pub outcome: &'static str,
    /// Rejection reason, if rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    /// HTTP status returned to the sender.
    pub status: u16,
    /// Secret version the request was checked against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_version: Option<String>,
    /// Nonce, truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl AuditEntry {
    /// Build the entry for a verification event.
    pub fn from_event(event: &VerificationEvent) -> Self {
        let result = &event.result;
        Self {
            timestamp: event.occurred_at.to_rfc3339(),
            request_id: event.request_id,
            outcome: result.outcome.as_str(),
            reason: result.reason(),
            status: result.status_code(),
            secret_version: result.secret_version.as_deref().map(truncate_token),
            nonce: result.nonce.as_deref().map(truncate_token),
        }
    }
}
