//! Webhook verification pipeline.
//!
//! Runs the checks in a fixed order and stops at the first failure:
//!
//! 1. signature header present, else `MissingSignatureHeader`
//! 2. secret resolves for the requested version, else `UnknownSecretVersion`
//! 3. raw body available, else `ServerMisconfiguration`
//! 4. signature matches, else `SignatureMismatch`
//! 5. nonce header present, else `MissingNonce`
//! 6. nonce not seen within its TTL, else `ReplayDetected`
//! 7. declared timestamp within drift (if configured), else `StaleTimestamp`
//!
//! The signature is checked before the nonce is recorded so a forged request
//! cannot consume a legitimate sender's nonce.

mod request;
mod result;

pub use request::{HeaderSet, SignedRequest};
pub use result::{Outcome, VerificationResult};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{redact_signature, truncate_token};
use crate::auth::{
    is_fresh, parse_timestamp, replay_key, verify_signature, ReplayGuard, SecretResolver,
    SignatureAlgorithm,
};
use crate::config::{HeadersConfig, Settings};
use crate::error::RejectReason;
use crate::events::{NoOpHook, VerificationEvent, VerificationHook};

/// Explicit pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub algorithm: SignatureAlgorithm,
    pub nonce_ttl: Duration,
    /// `None` disables the freshness check.
    pub max_drift: Option<Duration>,
    pub require_timestamp: bool,
    pub resolve_timeout: Duration,
    /// Upper bound on the hook call; a slower hook is abandoned for that event.
    pub hook_timeout: Duration,
    pub headers: HeadersConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::Sha256,
            nonce_ttl: Duration::from_secs(300),
            max_drift: None,
            require_timestamp: false,
            resolve_timeout: Duration::from_secs(2),
            hook_timeout: Duration::from_secs(1),
            headers: HeadersConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            algorithm: settings.security.algorithm,
            nonce_ttl: settings.security.nonce_ttl(),
            max_drift: settings.security.max_drift(),
            require_timestamp: settings.security.require_timestamp,
            resolve_timeout: settings.security.resolve_timeout(),
            hook_timeout: settings.security.hook_timeout(),
            headers: settings.headers.clone(),
        }
    }
}

/// Verifies webhook authenticity and freshness.
///
/// Cheap to share behind an `Arc`; every call is independent apart from the
/// nonce insert performed by the [`ReplayGuard`].
pub struct VerificationPipeline {
    config: PipelineConfig,
    resolver: Arc<dyn SecretResolver>,
    replay_guard: ReplayGuard,
    hook: Arc<dyn VerificationHook>,
}

impl VerificationPipeline {
    pub fn new(
        config: PipelineConfig,
        resolver: Arc<dyn SecretResolver>,
        replay_guard: ReplayGuard,
    ) -> Self {
        Self {
            config,
            resolver,
            replay_guard,
            hook: Arc::new(NoOpHook),
        }
    }

    /// Invoke `hook` with every result.
    pub fn with_hook(mut self, hook: Arc<dyn VerificationHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Verify a request against the wall clock.
    pub async fn verify(&self, request: &SignedRequest<'_>) -> VerificationResult {
        self.verify_at(request, Utc::now()).await
    }

    /// Verify a request as of `now`.
    pub async fn verify_at(
        &self,
        request: &SignedRequest<'_>,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        self.verify_with_id(Uuid::new_v4(), request, now).await
    }

    /// Verify a request as of `now`, correlated under a caller-chosen id.
    pub async fn verify_with_id(
        &self,
        request_id: Uuid,
        request: &SignedRequest<'_>,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        let result = self.evaluate(request_id, request, now).await;

        if result.is_accepted() {
            debug!(
                request_id = %request_id,
                secret_version = result.secret_version.as_deref().unwrap_or_default(),
                "Webhook accepted"
            );
        }

        let event = VerificationEvent::new(request_id, now, result.clone());
        if tokio::time::timeout(self.config.hook_timeout, self.hook.on_verified(&event))
            .await
            .is_err()
        {
            warn!(
                request_id = %request_id,
                hook = ?self.hook,
                timeout_ms = duration_ms(self.config.hook_timeout),
                "Verification hook timed out; event abandoned"
            );
        }

        result
    }

    async fn evaluate(
        &self,
        request_id: Uuid,
        request: &SignedRequest<'_>,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        let requested_version = request.secret_version_header();
        let nonce = request.nonce_header();

        // 1. Signature header
        let Some(signature) = request.signature_header() else {
            info!(request_id = %request_id, "Webhook rejected: signature header missing");
            return VerificationResult::rejected(
                RejectReason::MissingSignatureHeader,
                requested_version,
                nonce,
            );
        };

        // 2. Secret lookup
        let lookup = tokio::time::timeout(
            self.config.resolve_timeout,
            self.resolver.resolve(requested_version, now),
        )
        .await;
        let secret = match lookup {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                warn!(
                    request_id = %request_id,
                    secret_version = %requested_version.map(truncate_token).unwrap_or_default(),
                    "Webhook rejected: no valid secret for version"
                );
                return VerificationResult::rejected(
                    RejectReason::UnknownSecretVersion,
                    requested_version,
                    nonce,
                );
            }
            Err(_) => {
                error!(
                    request_id = %request_id,
                    timeout_ms = duration_ms(self.config.resolve_timeout),
                    "Secret resolution timed out"
                );
                return VerificationResult::rejected(
                    RejectReason::UnknownSecretVersion,
                    requested_version,
                    nonce,
                );
            }
        };
        let version = secret.version();

        // 3. Exact body bytes
        let Some(body) = request.raw_body() else {
            error!(
                request_id = %request_id,
                "Raw request body not available; the host must pass the exact received bytes"
            );
            return VerificationResult::rejected(
                RejectReason::ServerMisconfiguration,
                Some(version),
                nonce,
            );
        };

        // 4. Signature
        if !verify_signature(secret.value(), body, signature, self.config.algorithm) {
            warn!(
                request_id = %request_id,
                secret_version = %version,
                signature = %redact_signature(signature),
                "Webhook rejected: signature mismatch"
            );
            return VerificationResult::rejected(
                RejectReason::SignatureMismatch,
                Some(version),
                nonce,
            );
        }

        // 5. Nonce header
        let Some(nonce) = nonce else {
            info!(request_id = %request_id, "Webhook rejected: nonce header missing");
            return VerificationResult::rejected(RejectReason::MissingNonce, Some(version), None);
        };

        // 6. Replay
        let key = replay_key(version, nonce);
        match self.replay_guard.admit(&key, self.config.nonce_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    request_id = %request_id,
                    secret_version = %version,
                    nonce = %truncate_token(nonce),
                    "Webhook rejected: replay detected"
                );
                return VerificationResult::rejected(
                    RejectReason::ReplayDetected,
                    Some(version),
                    Some(nonce),
                );
            }
            Err(e) => {
                error!(
                    request_id = %request_id,
                    backend = self.replay_guard.backend(),
                    error = %e,
                    "Replay store unavailable; rejecting request"
                );
                return VerificationResult::rejected(
                    RejectReason::ServerMisconfiguration,
                    Some(version),
                    Some(nonce),
                );
            }
        }

        // 7. Freshness
        if let Some(max_drift) = self.config.max_drift {
            let fresh = match request.timestamp_header() {
                Some(raw) => parse_timestamp(raw)
                    .is_some_and(|declared| is_fresh(declared, now, max_drift)),
                None => !self.config.require_timestamp,
            };
            if !fresh {
                info!(
                    request_id = %request_id,
                    timestamp = %request.timestamp_header().map(truncate_token).unwrap_or_default(),
                    max_drift_secs = max_drift.as_secs(),
                    "Webhook rejected: stale timestamp"
                );
                return VerificationResult::rejected(
                    RejectReason::StaleTimestamp,
                    Some(version),
                    Some(nonce),
                );
            }
        }

        VerificationResult::accepted(version.to_owned(), nonce.to_owned())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for VerificationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationPipeline")
            .field("config", &self.config)
            .field("replay_guard", &self.replay_guard)
            .field("hook", &self.hook)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{sign, MemoryNonceStore, Secret, StaticSecretResolver};
    use crate::events::ChannelHook;
    use async_trait::async_trait;

    const SECRET: &str = "shhh";
    const BODY: &[u8] = br#"{"hi":"there"}"#;

    fn pipeline_with(config: PipelineConfig) -> VerificationPipeline {
        let resolver = StaticSecretResolver::with_secrets([Secret::new("v1", SECRET)]);
        VerificationPipeline::new(
            config,
            Arc::new(resolver),
            ReplayGuard::local(Arc::new(MemoryNonceStore::default())),
        )
    }

    fn pipeline() -> VerificationPipeline {
        pipeline_with(PipelineConfig::default())
    }

    fn valid_signature() -> String {
        sign(SECRET.as_bytes(), BODY, SignatureAlgorithm::Sha256)
    }

    #[tokio::test]
    async fn test_missing_signature_wins_over_everything() {
        let pipeline = pipeline();
        // Unknown version, no body, no nonce: the signature header is still reported.
        let request = SignedRequest::without_body().secret_version("nope");
        let result = pipeline.verify(&request).await;
        assert_eq!(result.reason(), Some(RejectReason::MissingSignatureHeader));
    }

    #[tokio::test]
    async fn test_unknown_version_before_body_check() {
        let pipeline = pipeline();
        let sig = valid_signature();
        let request = SignedRequest::without_body()
            .signature(&sig)
            .secret_version("v9")
            .nonce("n1");
        let result = pipeline.verify(&request).await;
        assert_eq!(result.reason(), Some(RejectReason::UnknownSecretVersion));
    }

    #[tokio::test]
    async fn test_missing_body_is_misconfiguration() {
        let pipeline = pipeline();
        let sig = valid_signature();
        let request = SignedRequest::without_body().signature(&sig).nonce("n1");
        let result = pipeline.verify(&request).await;
        assert_eq!(result.reason(), Some(RejectReason::ServerMisconfiguration));
        assert_eq!(result.status_code(), 500);
    }

    #[tokio::test]
    async fn test_forged_request_does_not_consume_nonce() {
        let pipeline = pipeline();
        let forged = SignedRequest::new(BODY)
            .signature("sha256=0000")
            .nonce("n1");
        assert_eq!(
            pipeline.verify(&forged).await.reason(),
            Some(RejectReason::SignatureMismatch)
        );

        let sig = valid_signature();
        let genuine = SignedRequest::new(BODY).signature(&sig).nonce("n1");
        assert!(pipeline.verify(&genuine).await.is_accepted());
    }

    #[tokio::test]
    async fn test_freshness_window() {
        let pipeline = pipeline_with(PipelineConfig {
            max_drift: Some(Duration::from_secs(300)),
            ..PipelineConfig::default()
        });
        let sig = valid_signature();
        let now = DateTime::from_timestamp(1_718_000_000, 0).unwrap();

        let fresh = SignedRequest::new(BODY)
            .signature(&sig)
            .nonce("fresh")
            .timestamp("1717999900");
        assert!(pipeline.verify_at(&fresh, now).await.is_accepted());

        let stale = SignedRequest::new(BODY)
            .signature(&sig)
            .nonce("stale")
            .timestamp("1717999000");
        let result = pipeline.verify_at(&stale, now).await;
        assert_eq!(result.reason(), Some(RejectReason::StaleTimestamp));
        assert_eq!(result.status_code(), 400);

        let garbage = SignedRequest::new(BODY)
            .signature(&sig)
            .nonce("garbage")
            .timestamp("not-a-time");
        assert_eq!(
            pipeline.verify_at(&garbage, now).await.reason(),
            Some(RejectReason::StaleTimestamp)
        );

        // Without a timestamp header the check is skipped unless required.
        let absent = SignedRequest::new(BODY).signature(&sig).nonce("absent");
        assert!(pipeline.verify_at(&absent, now).await.is_accepted());
    }

    #[tokio::test]
    async fn test_required_timestamp() {
        let pipeline = pipeline_with(PipelineConfig {
            max_drift: Some(Duration::from_secs(300)),
            require_timestamp: true,
            ..PipelineConfig::default()
        });
        let sig = valid_signature();
        let request = SignedRequest::new(BODY).signature(&sig).nonce("n1");
        assert_eq!(
            pipeline.verify(&request).await.reason(),
            Some(RejectReason::StaleTimestamp)
        );
    }

    #[derive(Debug)]
    struct HangingResolver;

    #[async_trait]
    impl SecretResolver for HangingResolver {
        async fn resolve(&self, _version: Option<&str>, _now: DateTime<Utc>) -> Option<Secret> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolver_timeout_fails_closed() {
        let pipeline = VerificationPipeline::new(
            PipelineConfig {
                resolve_timeout: Duration::from_millis(100),
                ..PipelineConfig::default()
            },
            Arc::new(HangingResolver),
            ReplayGuard::local(Arc::new(MemoryNonceStore::default())),
        );
        let sig = valid_signature();
        let request = SignedRequest::new(BODY).signature(&sig).nonce("n1");
        assert_eq!(
            pipeline.verify(&request).await.reason(),
            Some(RejectReason::UnknownSecretVersion)
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_misconfiguration() {
        let store = Arc::new(MemoryNonceStore::new(1));
        store.admit("other", Duration::from_secs(300)).unwrap();
        let pipeline = VerificationPipeline::new(
            PipelineConfig::default(),
            Arc::new(StaticSecretResolver::with_secrets([Secret::new("v1", SECRET)])),
            ReplayGuard::local(store),
        );

        let sig = valid_signature();
        let request = SignedRequest::new(BODY).signature(&sig).nonce("n1");
        let result = pipeline.verify(&request).await;
        assert_eq!(result.reason(), Some(RejectReason::ServerMisconfiguration));
    }

    #[tokio::test]
    async fn test_hook_sees_every_result() {
        let (hook, mut events) = ChannelHook::new(8);
        let pipeline = pipeline().with_hook(Arc::new(hook));
        let sig = valid_signature();

        let request = SignedRequest::new(BODY).signature(&sig).nonce("n1");
        pipeline.verify(&request).await;
        pipeline.verify(&request).await;

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert!(first.result.is_accepted());
        assert_eq!(second.result.reason(), Some(RejectReason::ReplayDetected));
        assert_ne!(first.request_id, second.request_id);
    }

    #[derive(Debug)]
    struct StuckHook;

    #[async_trait]
    impl VerificationHook for StuckHook {
        async fn on_verified(&self, _event: &VerificationEvent) {
            std::future::pending::<()>().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_hook_does_not_block_verify() {
        let pipeline = pipeline_with(PipelineConfig {
            hook_timeout: Duration::from_millis(50),
            ..PipelineConfig::default()
        })
        .with_hook(Arc::new(StuckHook));
        let sig = valid_signature();

        let request = SignedRequest::new(BODY).signature(&sig).nonce("n1");
        let result = tokio::time::timeout(Duration::from_secs(2), pipeline.verify(&request))
            .await
            .expect("verify blocked on hook");
        assert!(result.is_accepted());

        // The abandoned hook call must not leave the nonce unrecorded.
        let again = tokio::time::timeout(Duration::from_secs(2), pipeline.verify(&request))
            .await
            .expect("verify blocked on hook");
        assert_eq!(again.reason(), Some(RejectReason::ReplayDetected));
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(250)), 250);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        settings.security.max_drift_seconds = Some(90);
        settings.security.algorithm = SignatureAlgorithm::Sha512;

        let config = PipelineConfig::from_settings(&settings);
        assert_eq!(config.max_drift, Some(Duration::from_secs(90)));
        assert_eq!(config.algorithm, SignatureAlgorithm::Sha512);
        assert_eq!(config.nonce_ttl, Duration::from_secs(300));
        assert_eq!(config.hook_timeout, Duration::from_secs(1));
    }
}
