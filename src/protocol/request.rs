//! Request type for the sidecar protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::pipeline::HeaderSet;

/// A webhook handed to the gateway for verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Request headers as received by the host.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw body, hex-encoded. `None` when the host did not preserve it.
    #[serde(default)]
    pub body_hex: Option<String>,
}

impl VerifyRequest {
    /// Build a request from raw parts.
    pub fn new<I, K, V>(headers: I, body: Option<&[u8]>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            body_hex: body.map(hex::encode),
        }
    }

    /// Case-insensitive view of the headers.
    pub fn header_set(&self) -> HeaderSet {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect()
    }

    /// Decode the body.
    ///
    /// A body that is not valid hex counts as not preserved.
    pub fn decode_body(&self) -> Option<Vec<u8>> {
        self.body_hex
            .as_deref()
            .and_then(|encoded| hex::decode(encoded.trim()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_round_trip() {
        let request = VerifyRequest::new([("X-Event-Nonce", "n1")], Some(br#"{"hi":"there"}"#));
        assert_eq!(request.body_hex.as_deref(), Some("7b226869223a227468657265227d"));
        assert_eq!(request.decode_body().unwrap(), br#"{"hi":"there"}"#);
    }

    #[test]
    fn test_invalid_hex_is_absent_body() {
        let request = VerifyRequest {
            headers: BTreeMap::new(),
            body_hex: Some("zz".to_string()),
        };
        assert!(request.decode_body().is_none());
        assert!(VerifyRequest::default().decode_body().is_none());
    }

    #[test]
    fn test_empty_body_is_preserved() {
        let request = VerifyRequest::new(Vec::<(String, String)>::new(), Some(b""));
        assert_eq!(request.decode_body(), Some(Vec::new()));
    }

    #[test]
    fn test_parse_minimal_frame() {
        let request: VerifyRequest =
            serde_json::from_str(r#"{"headers":{"x-hub-signature-256":"sha256=ab"}}"#).unwrap();
        assert!(request.body_hex.is_none());
        assert_eq!(
            request.header_set().get("X-Hub-Signature-256"),
            Some("sha256=ab")
        );
    }
}
