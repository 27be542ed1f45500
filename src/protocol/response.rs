//! Response types for the sidecar protocol.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::RejectReason;
use crate::pipeline::VerificationResult;

/// Sanitize error messages before sending to clients.
///
/// Frame errors never echo parser output back over the socket.
fn sanitize_error_message(code: &str) -> &'static str {
    match code {
        "INVALID_MESSAGE" => "Invalid request message",
        "INTERNAL_ERROR" => "Internal server error",
        "CONNECTION_TIMEOUT" => "Connection timed out",
        _ => "An error occurred",
    }
}

/// The gateway's verdict on one webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Identifier shared with the gateway's logs and audit trail.
    pub request_id: Uuid,

    /// Whether the host should process the webhook.
    pub accepted: bool,

    /// HTTP status the host should answer the sender with.
    pub status: u16,

    /// Rejection reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,

    /// Human-readable rejection message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Secret version the webhook was verified against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_version: Option<String>,

    /// Frame-level error; the webhook was not evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Error details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "INVALID_MESSAGE").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

impl VerifyResponse {
    /// Response carrying a pipeline verdict.
    pub fn from_result(request_id: Uuid, result: &VerificationResult) -> Self {
        let reason = result.reason();
        Self {
            request_id,
            accepted: result.is_accepted(),
            status: result.status_code(),
            reason,
            message: reason.map(|r| r.to_string()),
            secret_version: result.secret_version.clone(),
            error: None,
        }
    }

    /// Response for a frame that could not be evaluated.
    ///
    /// The message is sanitized before being sent to the client. The original
    /// error is logged server-side.
    pub fn error_with_id(
        request_id: Uuid,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let code = code.into();
        let original_message = message.into();

        debug!(
            request_id = %request_id,
            code = %code,
            message = %original_message,
            "Error response (sanitized for client)"
        );

        let status = if code == "INVALID_MESSAGE" { 400 } else { 500 };

        Self {
            request_id,
            accepted: false,
            status,
            reason: None,
            message: None,
            secret_version: None,
            error: Some(ErrorResponse {
                message: sanitize_error_message(&code).to_string(),
                code,
            }),
        }
    }
}
