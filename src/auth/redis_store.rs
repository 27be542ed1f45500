//! Shared nonce store backed by Redis.
//!
//! Uses `SET key 1 NX PX <ttl>` so the existence check and the insert are a
//! single server-side operation, which keeps replay protection correct when
//! several gateway instances sit behind a load balancer.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use tracing::debug;

use crate::error::{GatewayError, StoreErrorKind};

use super::replay::ReplayStore;

/// Redis-backed [`ReplayStore`].
///
/// Generic over the async connection so the command sequence can be driven
/// against any [`ConnectionLike`]; production code uses the multiplexed
/// connection returned by [`RedisNonceStore::connect`].
#[derive(Clone)]
pub struct RedisNonceStore<C = MultiplexedConnection> {
    connection: C,
    key_prefix: String,
}

impl RedisNonceStore {
    /// Connect to Redis at `url`. Keys are stored as `<key_prefix><key>`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a malformed URL and `Store` when the server
    /// cannot be reached.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, GatewayError> {
        let client = redis::Client::open(url).map_err(|e| GatewayError::Config {
            message: format!("Invalid Redis URL: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| GatewayError::Store {
                kind: StoreErrorKind::Unreachable {
                    message: e.to_string(),
                },
            })?;

        debug!(key_prefix = %key_prefix, "Connected to Redis nonce store");

        Ok(Self::with_connection(connection, key_prefix))
    }
}

impl<C> RedisNonceStore<C> {
    /// Wrap an already established connection.
    pub fn with_connection(connection: C, key_prefix: &str) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

impl<C> fmt::Debug for RedisNonceStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisNonceStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

/// Build the atomic admit command for one key.
fn set_nx_px(storage_key: &str, ttl: Duration) -> redis::Cmd {
    // PX 0 is rejected by the server.
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

    let mut cmd = redis::cmd("SET");
    cmd.arg(storage_key).arg(1).arg("NX").arg("PX").arg(ttl_ms);
    cmd
}

#[async_trait]
impl<C> ReplayStore for RedisNonceStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreErrorKind> {
        let mut connection = self.connection.clone();

        // Reply is "OK" when the key was set and nil when it already existed.
        let reply: Option<String> = set_nx_px(&self.storage_key(key), ttl)
            .query_async(&mut connection)
            .await
            .map_err(|e| StoreErrorKind::Unreachable {
                message: e.to_string(),
            })?;

        Ok(reply.is_some())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
