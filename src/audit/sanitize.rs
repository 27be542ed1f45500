//! Redaction of sender-supplied tokens before they reach logs.
//!
//! Signatures are never logged in full. Nonces are logged (they identify a
//! replay) but bounded in length since they are attacker-controlled.

/// Maximum characters kept from a logged token.
pub const MAX_TOKEN_LENGTH: usize = 64;

/// Hex characters of a signature kept for correlation.
const SIGNATURE_PREFIX_CHARS: usize = 8;

/// Reduce a signature header value to a loggable fingerprint.
///
/// `sha256=df33818b7454...` becomes `sha256=df33818b…(64)`: the algorithm
/// prefix, the first eight characters and the length of the digest part.
pub fn redact_signature(signature: &str) -> String {
    let (prefix, digest) = match signature.split_once('=') {
        Some((prefix, digest)) if prefix.len() <= 16 => (Some(prefix), digest),
        _ => (None, signature),
    };

    let shown: String = digest.chars().take(SIGNATURE_PREFIX_CHARS).collect();
    let len = digest.chars().count();

    match prefix {
        Some(prefix) => format!("{}={}…({})", truncate_token(prefix), shown, len),
        None => format!("{}…({})", shown, len),
    }
}

/// Truncate a token to [`MAX_TOKEN_LENGTH`] characters, replacing control
/// characters so a crafted value cannot forge log lines.
pub fn truncate_token(token: &str) -> String {
    let mut out: String = token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .map(|c| if c.is_control() { '?' } else { c })
        .collect();
    if token.chars().count() > MAX_TOKEN_LENGTH {
        out.push('…');
    }
    out
}
