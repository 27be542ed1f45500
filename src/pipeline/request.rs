//! The request view handed to the verification pipeline.

use std::collections::HashMap;

use crate::config::HeadersConfig;

/// Case-insensitive header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    headers: HashMap<String, String>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header. A later value for the same name replaces the earlier one.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

/// Immutable view of one inbound webhook.
///
/// `raw_body` is `None` when the host could not preserve the exact wire
/// bytes. Blank header values count as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignedRequest<'a> {
    raw_body: Option<&'a [u8]>,
    signature: Option<&'a str>,
    nonce: Option<&'a str>,
    secret_version: Option<&'a str>,
    timestamp: Option<&'a str>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl<'a> SignedRequest<'a> {
    /// A request carrying the given exact body bytes and no headers yet.
    pub fn new(raw_body: &'a [u8]) -> Self {
        Self {
            raw_body: Some(raw_body),
            ..Self::default()
        }
    }

    /// A request whose body bytes were not preserved by the host.
    pub fn without_body() -> Self {
        Self::default()
    }

    /// Extract the verification headers from `headers` using `names`.
    pub fn from_headers(
        headers: &'a HeaderSet,
        raw_body: Option<&'a [u8]>,
        names: &HeadersConfig,
    ) -> Self {
        Self {
            raw_body,
            signature: present(headers.get(&names.signature)),
            nonce: present(headers.get(&names.nonce)),
            secret_version: present(headers.get(&names.secret_version)),
            timestamp: present(headers.get(&names.timestamp)),
        }
    }

    pub fn signature(mut self, value: &'a str) -> Self {
        self.signature = present(Some(value));
        self
    }

    pub fn nonce(mut self, value: &'a str) -> Self {
        self.nonce = present(Some(value));
        self
    }

    pub fn secret_version(mut self, value: &'a str) -> Self {
        self.secret_version = present(Some(value));
        self
    }

    pub fn timestamp(mut self, value: &'a str) -> Self {
        self.timestamp = present(Some(value));
        self
    }

    pub fn raw_body(&self) -> Option<&'a [u8]> {
        self.raw_body
    }

    pub fn signature_header(&self) -> Option<&'a str> {
        self.signature
    }

    pub fn nonce_header(&self) -> Option<&'a str> {
        self.nonce
    }

    pub fn secret_version_header(&self) -> Option<&'a str> {
        self.secret_version
    }

    pub fn timestamp_header(&self) -> Option<&'a str> {
        self.timestamp
    }
}
