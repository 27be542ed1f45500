//! Signing secret resolution with rotation support.
//!
//! A [`SecretResolver`] maps an optional version identifier to the secret a
//! sender signed with. Several versions may be valid at once so senders can
//! migrate to a new secret before the old one is revoked.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::GatewayError;

/// A signing secret and its validity window.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    version: String,
    value: Vec<u8>,
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
}

impl Secret {
    /// Create a secret that is valid indefinitely.
    pub fn new(version: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            version: version.into(),
            value: value.into(),
            valid_from: DateTime::<Utc>::MIN_UTC,
            valid_until: None,
        }
    }

    /// Restrict the validity window. `None` means no upper bound.
    pub fn with_validity(mut self, from: DateTime<Utc>, until: Option<DateTime<Utc>>) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    /// `valid_from <= now < valid_until`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && self.valid_until.map_or(true, |until| now < until)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("version", &self.version)
            .field("value", &"[REDACTED]")
            .field("valid_from", &self.valid_from)
            .field("valid_until", &self.valid_until)
            .finish()
    }
}

/// Resolves the signing secret for a request.
///
/// "Not found" is `None`, never an error. Implementations backed by a remote
/// key store may take time; the pipeline bounds every call with a timeout.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, version: Option<&str>, now: DateTime<Utc>) -> Option<Secret>;
}

#[derive(Debug, Default)]
struct SecretTable {
    secrets: HashMap<String, Secret>,
    default_version: Option<String>,
}

impl SecretTable {
    fn lookup(&self, version: Option<&str>, now: DateTime<Utc>) -> Option<Secret> {
        let secret = match version.or(self.default_version.as_deref()) {
            Some(version) => self.secrets.get(version)?,
            // No version requested and no default: newest currently valid secret.
            None => self
                .secrets
                .values()
                .filter(|s| s.is_valid_at(now))
                .max_by(|a, b| {
                    a.valid_from
                        .cmp(&b.valid_from)
                        .then_with(|| a.version.cmp(&b.version))
                })?,
        };

        secret.is_valid_at(now).then(|| secret.clone())
    }
}

/// In-memory resolver over a fixed table of secrets.
///
/// The table can be swapped atomically, which is how the daemon picks up a
/// rotated secrets file on SIGHUP.
#[derive(Debug, Default)]
pub struct StaticSecretResolver {
    table: RwLock<SecretTable>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from a list of secrets.
    pub fn with_secrets(secrets: impl IntoIterator<Item = Secret>) -> Self {
        let resolver = Self::new();
        for secret in secrets {
            resolver.insert(secret);
        }
        resolver
    }

    /// Load secrets from a TOML secrets file.
    pub fn from_file(path: &Path) -> Result<Self, GatewayError> {
        let resolver = Self::new();
        resolver.reload(path)?;
        Ok(resolver)
    }

    /// Add or replace a secret version.
    pub fn insert(&self, secret: Secret) {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        debug!(version = %secret.version, "Secret version registered");
        table.secrets.insert(secret.version.clone(), secret);
    }

    /// Remove a secret version. Returns `true` if it existed.
    pub fn revoke(&self, version: &str) -> bool {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let removed = table.secrets.remove(version).is_some();
        if removed {
            info!(version = %version, "Secret version revoked");
        }
        removed
    }

    /// Set the version used when a request does not name one.
    pub fn set_default_version(&self, version: Option<String>) {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        table.default_version = version;
    }

    /// Atomically swap in a new set of secrets.
    ///
    /// Rejects duplicate versions and a `default_version` that names no
    /// secret; on error the current table is left untouched.
    pub fn replace(
        &self,
        secrets: impl IntoIterator<Item = Secret>,
        default_version: Option<String>,
    ) -> Result<usize, GatewayError> {
        let mut table = HashMap::new();
        for secret in secrets {
            if table.contains_key(&secret.version) {
                return Err(GatewayError::Secret {
                    message: format!("Duplicate secret version '{}'", secret.version),
                });
            }
            table.insert(secret.version.clone(), secret);
        }

        if let Some(default) = &default_version {
            if !table.contains_key(default) {
                return Err(GatewayError::Secret {
                    message: format!("default_version '{}' does not name a secret", default),
                });
            }
        }

        let count = table.len();
        *self.table.write().unwrap_or_else(|e| e.into_inner()) = SecretTable {
            secrets: table,
            default_version,
        };
        Ok(count)
    }

    /// Replace the whole table with the contents of a secrets file.
    ///
    /// The file is parsed completely before the swap, so a broken file leaves
    /// the current secrets in place.
    pub fn reload(&self, path: &Path) -> Result<usize, GatewayError> {
        let file = load_secrets_file(path)?;
        let secrets = file.secrets.into_iter().map(SecretEntry::into_secret);

        let count = self
            .replace(secrets, file.default_version)
            .map_err(|e| match e {
                GatewayError::Secret { message } => GatewayError::Secret {
                    message: format!("{} in {}", message, path.display()),
                },
                other => other,
            })?;
        info!(path = %path.display(), versions = count, "Secrets loaded");
        Ok(count)
    }

    /// Number of registered versions (valid or not).
    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(|e| e.into_inner()).secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, version: Option<&str>, now: DateTime<Utc>) -> Option<Secret> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .lookup(version, now)
    }
}

struct CachedSecret {
    secret: Secret,
    expires_at: DateTime<Utc>,
}

/// TTL cache in front of a (typically remote) resolver.
///
/// An entry expires at `min(resolved_at + ttl, secret.valid_until)`, so the
/// cache never serves a secret past its own validity. Misses are not cached.
pub struct CachingSecretResolver<R> {
    inner: R,
    ttl: TimeDelta,
    cache: Mutex<HashMap<Option<String>, CachedSecret>>,
}

impl<R: SecretResolver> CachingSecretResolver<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::zero()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop all cached entries.
    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: SecretResolver> SecretResolver for CachingSecretResolver<R> {
    async fn resolve(&self, version: Option<&str>, now: DateTime<Utc>) -> Option<Secret> {
        let key = version.map(str::to_owned);

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            match cache.get(&key) {
                Some(entry) if now < entry.expires_at && entry.secret.is_valid_at(now) => {
                    return Some(entry.secret.clone());
                }
                Some(_) => {
                    cache.remove(&key);
                }
                None => {}
            }
        }

        let secret = self.inner.resolve(version, now).await?;

        let mut expires_at = now.checked_add_signed(self.ttl).unwrap_or(now);
        if let Some(until) = secret.valid_until {
            expires_at = expires_at.min(until);
        }

        self.cache.lock().unwrap_or_else(|e| e.into_inner()).insert(
            key,
            CachedSecret {
                secret: secret.clone(),
                expires_at,
            },
        );

        Some(secret)
    }
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
    #[serde(default)]
    default_version: Option<String>,
    #[serde(default)]
    secrets: Vec<SecretEntry>,
}

#[derive(Deserialize)]
struct SecretEntry {
    version: String,
    value: String,
    #[serde(default)]
    valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    valid_until: Option<DateTime<Utc>>,
}

impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEntry")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl SecretEntry {
    fn into_secret(self) -> Secret {
        Secret::new(self.version, self.value.into_bytes()).with_validity(
            self.valid_from.unwrap_or(DateTime::<Utc>::MIN_UTC),
            self.valid_until,
        )
    }
}

/// Read and parse a secrets file.
///
/// Security: on Unix the file must not be readable by group or others.
fn load_secrets_file(path: &Path) -> Result<SecretsFile, GatewayError> {
    let metadata = std::fs::metadata(path).map_err(|e| GatewayError::Secret {
        message: format!(
            "Failed to read secrets file metadata from {}: {}",
            path.display(),
            e
        ),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(GatewayError::Secret {
                message: format!(
                    "Secrets file {} has insecure permissions {:04o}, expected 0600 or 0400",
                    path.display(),
                    mode & 0o777
                ),
            });
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    let content = std::fs::read_to_string(path).map_err(|e| GatewayError::Secret {
        message: format!("Failed to read secrets file {}: {}", path.display(), e),
    })?;

    toml::from_str(&content).map_err(|e| GatewayError::Secret {
        message: format!("Failed to parse secrets file {}: {}", path.display(), e),
    })
}
