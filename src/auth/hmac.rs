//! HMAC webhook signature computation and verification.

use std::fmt;
use std::str::FromStr;

use ring::hmac;
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};

use crate::error::GatewayError;

/// HMAC algorithm used to sign webhook bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    /// Name as it appears in the `<algorithm>=<hex>` signature prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    fn ring_algorithm(&self) -> hmac::Algorithm {
        match self {
            Self::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha384 => hmac::HMAC_SHA384,
            Self::Sha512 => hmac::HMAC_SHA512,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(GatewayError::Config {
                message: format!(
                    "Unsupported signature algorithm '{}'. Valid: sha1, sha256, sha384, sha512",
                    other
                ),
            }),
        }
    }
}

/// Compute the lowercase hex HMAC of `body` under `secret`.
pub fn compute_signature(secret: &[u8], body: &[u8], algorithm: SignatureAlgorithm) -> String {
    let key = hmac::Key::new(algorithm.ring_algorithm(), secret);
    let tag = hmac::sign(&key, body);
    hex::encode(tag.as_ref())
}

/// Produce a signature header value in the `<algorithm>=<hex>` form.
pub fn sign(secret: &[u8], body: &[u8], algorithm: SignatureAlgorithm) -> String {
    format!("{}={}", algorithm.name(), compute_signature(secret, body, algorithm))
}

/// Verify a supplied signature against the exact body bytes.
///
/// Accepts both `<algorithm>=<hex>` and bare hex. A prefix naming any other
/// algorithm is left in place and therefore never matches. Malformed input
/// yields `false`.
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    supplied: &str,
    algorithm: SignatureAlgorithm,
) -> bool {
    let expected = compute_signature(secret, body, algorithm);

    let supplied = supplied.trim();
    let candidate = strip_algorithm_prefix(supplied, algorithm).to_ascii_lowercase();

    constant_time_eq(expected.as_bytes(), candidate.as_bytes())
}

fn strip_algorithm_prefix(signature: &str, algorithm: SignatureAlgorithm) -> &str {
    let name = algorithm.name();
    match signature.split_once('=') {
        Some((prefix, rest)) if prefix.eq_ignore_ascii_case(name) => rest,
        _ => signature,
    }
}

/// Compare two byte strings without leaking where they differ.
///
/// Both inputs are zero-padded to a common length and compared in full; the
/// length check is folded into the result instead of returning early.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());

    let mut left = vec![0u8; len];
    left[..a.len()].copy_from_slice(a);
    let mut right = vec![0u8; len];
    right[..b.len()].copy_from_slice(b);

    let same_len = Choice::from(u8::from(a.len() == b.len()));
    bool::from(left.as_slice().ct_eq(right.as_slice()) & same_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"shhh";
    const BODY: &[u8] = br#"{"hi":"there"}"#;
    const EXPECTED_SHA256: &str =
        "df33818b745434c295f09ad033ac3b8c0e5f863ad5686097eca6370ef00a0507";

    #[test]
    fn test_known_vector() {
        assert_eq!(
            compute_signature(
                b"key",
                b"The quick brown fox jumps over the lazy dog",
                SignatureAlgorithm::Sha256
            ),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
        assert_eq!(compute_signature(SECRET, BODY, SignatureAlgorithm::Sha256), EXPECTED_SHA256);
    }

    #[test]
    fn test_prefixed_and_bare_accepted() {
        let prefixed = format!("sha256={}", EXPECTED_SHA256);
        assert!(verify_signature(SECRET, BODY, &prefixed, SignatureAlgorithm::Sha256));
        assert!(verify_signature(SECRET, BODY, EXPECTED_SHA256, SignatureAlgorithm::Sha256));
        assert_eq!(sign(SECRET, BODY, SignatureAlgorithm::Sha256), prefixed);
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let upper = format!("SHA256={}", EXPECTED_SHA256.to_ascii_uppercase());
        assert!(verify_signature(SECRET, BODY, &upper, SignatureAlgorithm::Sha256));
    }

    #[test]
    fn test_wrong_algorithm_prefix_rejected() {
        let sig = format!("sha1={}", EXPECTED_SHA256);
        assert!(!verify_signature(SECRET, BODY, &sig, SignatureAlgorithm::Sha256));
    }

    #[test]
    fn test_sha1_configured() {
        let sig = "sha1=2b4dd0093441d8ff3cd1a5640d04b902f4198107";
        assert!(verify_signature(SECRET, BODY, sig, SignatureAlgorithm::Sha1));
        assert!(!verify_signature(SECRET, BODY, sig, SignatureAlgorithm::Sha256));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        for sig in ["", "sha256=", "sha256=invalid_signature_here", "zz", "=", "sha256=é"] {
            assert!(!verify_signature(SECRET, BODY, sig, SignatureAlgorithm::Sha256), "{sig}");
        }
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let truncated = &EXPECTED_SHA256[..63];
        assert!(!verify_signature(SECRET, BODY, truncated, SignatureAlgorithm::Sha256));
    }

    #[test]
    fn test_body_mutation_rejected() {
        let sig = sign(SECRET, BODY, SignatureAlgorithm::Sha256);
        for i in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[i] ^= 0x01;
            assert!(!verify_signature(SECRET, &mutated, &sig, SignatureAlgorithm::Sha256));
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abc\0"));
        assert!(!constant_time_eq(b"", b"a"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("SHA256".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha256);
        assert_eq!("sha512".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha512);
        assert!("md5".parse::<SignatureAlgorithm>().is_err());
        assert_eq!(SignatureAlgorithm::default(), SignatureAlgorithm::Sha256);
    }
}
