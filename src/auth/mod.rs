//! Authentication module.
//!
//! Signature verification, secret resolution, replay protection and
//! timestamp freshness checks.

mod freshness;
mod hmac;
mod nonce;
mod redis_store;
mod replay;
mod secrets;

pub use freshness::{is_fresh, parse_timestamp};
pub use hmac::{compute_signature, constant_time_eq, sign, verify_signature, SignatureAlgorithm};
pub use nonce::{MemoryNonceStore, SweepHandle, DEFAULT_MAX_ENTRIES};
pub use redis_store::RedisNonceStore;
pub use replay::{replay_key, ReplayGuard, ReplayStore, DEFAULT_STORE_TIMEOUT};
pub use secrets::{CachingSecretResolver, Secret, SecretResolver, StaticSecretResolver};
