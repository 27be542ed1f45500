//! Verification outcome types.

use serde::{Serialize, Serializer};

use crate::error::RejectReason;

/// Terminal state of one verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected(RejectReason),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Result of running a request through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub outcome: Outcome,
    /// Version of the secret the request was checked against, once resolved.
    pub secret_version: Option<String>,
    /// Nonce presented by the sender, if any.
    pub nonce: Option<String>,
}

/// Flat JSON shape: `{"outcome": "rejected", "reason": "REPLAY_DETECTED", ...}`.
#[derive(Serialize)]
struct ResultRepr<'a> {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<RejectReason>,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

impl Serialize for VerificationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ResultRepr {
            outcome: self.outcome.as_str(),
            reason: self.reason(),
            status: self.status_code(),
            secret_version: self.secret_version.as_deref(),
            nonce: self.nonce.as_deref(),
        }
        .serialize(serializer)
    }
}

impl VerificationResult {
    pub(crate) fn accepted(secret_version: String, nonce: String) -> Self {
        Self {
            outcome: Outcome::Accepted,
            secret_version: Some(secret_version),
            nonce: Some(nonce),
        }
    }

    pub(crate) fn rejected(
        reason: RejectReason,
        secret_version: Option<&str>,
        nonce: Option<&str>,
    ) -> Self {
        Self {
            outcome: Outcome::Rejected(reason),
            secret_version: secret_version.map(str::to_owned),
            nonce: nonce.map(str::to_owned),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, Outcome::Accepted)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self.outcome {
            Outcome::Accepted => None,
            Outcome::Rejected(reason) => Some(reason),
        }
    }

    /// HTTP status the host should answer with.
    pub fn status_code(&self) -> u16 {
        self.reason().map_or(200, |reason| reason.status_code())
    }
}
