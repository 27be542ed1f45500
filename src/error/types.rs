//! Error types for the hookgate gateway.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for operational failures.
///
/// Verification outcomes are not errors: a rejected webhook is reported as a
/// [`RejectReason`] inside a `VerificationResult`. This type covers the host
/// side (configuration, sockets, framing, stores).
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Secret loading errors.
    #[error("Secret error: {message}")]
    Secret { message: String },

    /// Socket-related errors.
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Replay store errors.
    #[error("Replay store error: {kind}")]
    Store { kind: StoreErrorKind },

    /// Protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a webhook is rejected by the verification pipeline.
///
/// The variant order mirrors the order in which the pipeline checks them.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    #[error("signature header missing")]
    MissingSignatureHeader,

    #[error("no valid secret for the requested version")]
    UnknownSecretVersion,

    #[error("server misconfiguration")]
    ServerMisconfiguration,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("nonce header missing")]
    MissingNonce,

    #[error("nonce already used (replay detected)")]
    ReplayDetected,

    #[error("timestamp outside the allowed drift window")]
    StaleTimestamp,
}

impl RejectReason {
    /// HTTP status the host should answer the sender with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingSignatureHeader | Self::MissingNonce | Self::StaleTimestamp => 400,
            Self::UnknownSecretVersion | Self::SignatureMismatch => 401,
            Self::ReplayDetected => 409,
            Self::ServerMisconfiguration => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSignatureHeader => "MISSING_SIGNATURE_HEADER",
            Self::UnknownSecretVersion => "UNKNOWN_SECRET_VERSION",
            Self::ServerMisconfiguration => "SERVER_MISCONFIGURATION",
            Self::SignatureMismatch => "SIGNATURE_MISMATCH",
            Self::MissingNonce => "MISSING_NONCE",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::StaleTimestamp => "STALE_TIMESTAMP",
        }
    }

    /// Whether the failure is attributable to the host rather than the sender.
    pub fn is_operator_fault(&self) -> bool {
        matches!(self, Self::ServerMisconfiguration)
    }
}

/// Replay store error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorKind {
    #[error("backend unreachable: {message}")]
    Unreachable { message: String },

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("capacity of {max_entries} live nonces exhausted")]
    CapacityExhausted { max_entries: usize },
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RejectReason::MissingSignatureHeader.status_code(), 400);
        assert_eq!(RejectReason::MissingNonce.status_code(), 400);
        assert_eq!(RejectReason::StaleTimestamp.status_code(), 400);
        assert_eq!(RejectReason::UnknownSecretVersion.status_code(), 401);
        assert_eq!(RejectReason::SignatureMismatch.status_code(), 401);
        assert_eq!(RejectReason::ReplayDetected.status_code(), 409);
        assert_eq!(RejectReason::ServerMisconfiguration.status_code(), 500);
    }

    #[test]
    fn test_only_misconfiguration_is_operator_fault() {
        let all = [
            RejectReason::MissingSignatureHeader,
            RejectReason::UnknownSecretVersion,
            RejectReason::ServerMisconfiguration,
            RejectReason::SignatureMismatch,
            RejectReason::MissingNonce,
            RejectReason::ReplayDetected,
            RejectReason::StaleTimestamp,
        ];
        let faults: Vec<_> = all.iter().filter(|r| r.is_operator_fault()).collect();
        assert_eq!(faults, vec![&RejectReason::ServerMisconfiguration]);
    }

    #[test]
    fn test_reason_serializes_as_code() {
        let json = serde_json::to_string(&RejectReason::ReplayDetected).unwrap();
        assert_eq!(json, "\"REPLAY_DETECTED\"");
        assert_eq!(RejectReason::ReplayDetected.code(), "REPLAY_DETECTED");
    }
}
