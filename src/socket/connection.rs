//! Per-connection handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LimitsConfig;
use crate::error::{GatewayError, ProtocolErrorKind};
use crate::pipeline::{SignedRequest, VerificationPipeline};
use crate::protocol::{
    read_message_with_timeout, write_message_with_timeout, VerifyRequest, VerifyResponse,
};

use super::ConnectionMetrics;

/// Serve verification frames on one client connection until it closes.
///
/// A client may send any number of frames; each gets exactly one response.
pub async fn handle_connection<S>(
    stream: S,
    pipeline: Arc<VerificationPipeline>,
    limits: LimitsConfig,
    metrics: Arc<ConnectionMetrics>,
) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    loop {
        let result =
            process_request(&mut reader, &mut writer, &pipeline, &limits, &metrics).await;

        match result {
            Ok(()) => continue,
            Err(GatewayError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            }) => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(GatewayError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout,
            }) => {
                warn!("Connection timed out");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read one frame, verify it and write the verdict.
async fn process_request<R, W>(
    reader: &mut R,
    writer: &mut W,
    pipeline: &VerificationPipeline,
    limits: &LimitsConfig,
    metrics: &ConnectionMetrics,
) -> Result<(), GatewayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let socket_timeout = Duration::from_secs(limits.socket_timeout_seconds);
    let msg = read_message_with_timeout(reader, limits.max_message_size, socket_timeout).await?;

    let request_id = Uuid::new_v4();

    let response = match serde_json::from_slice::<VerifyRequest>(&msg) {
        Ok(frame) => {
            let headers = frame.header_set();
            let body = frame.decode_body();
            let request =
                SignedRequest::from_headers(&headers, body.as_deref(), &pipeline.config().headers);

            let result = pipeline
                .verify_with_id(request_id, &request, chrono::Utc::now())
                .await;
            metrics.record_verification(result.is_accepted());

            info!(
                request_id = %request_id,
                outcome = result.outcome.as_str(),
                status = result.status_code(),
                "Verification complete"
            );

            VerifyResponse::from_result(request_id, &result)
        }
        Err(e) => {
            metrics.record_invalid_frame();
            warn!(request_id = %request_id, "Malformed verification frame");
            VerifyResponse::error_with_id(request_id, "INVALID_MESSAGE", e.to_string())
        }
    };

    let response_bytes = serde_json::to_vec(&response)?;
    write_message_with_timeout(writer, &response_bytes, socket_timeout).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        sign, MemoryNonceStore, ReplayGuard, Secret, SignatureAlgorithm, StaticSecretResolver,
    };
    use crate::pipeline::PipelineConfig;
    use crate::protocol::{read_message, write_message, DEFAULT_MAX_MESSAGE_SIZE};

    const BODY: &[u8] = br#"{"hi":"there"}"#;

    fn pipeline() -> Arc<VerificationPipeline> {
        Arc::new(VerificationPipeline::new(
            PipelineConfig::default(),
            Arc::new(StaticSecretResolver::with_secrets([Secret::new("v1", "shhh")])),
            ReplayGuard::local(Arc::new(MemoryNonceStore::default())),
        ))
    }

    async fn exchange<S>(client: &mut S, frame: &[u8]) -> serde_json::Value
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        write_message(client, frame).await.unwrap();
        let reply = read_message(client, DEFAULT_MAX_MESSAGE_SIZE).await.unwrap();
        serde_json::from_slice(&reply).unwrap()
    }

    #[tokio::test]
    async fn test_verifies_frames_until_close() {
        let (mut client, server) = tokio::io::duplex(4096);
        let metrics = Arc::new(ConnectionMetrics::new());
        let handler = tokio::spawn(handle_connection(
            server,
            pipeline(),
            LimitsConfig::default(),
            Arc::clone(&metrics),
        ));

        let signature = sign(b"shhh", BODY, SignatureAlgorithm::Sha256);
        let request = VerifyRequest::new(
            [
                ("X-Hub-Signature-256", signature.as_str()),
                ("X-Event-Nonce", "n1"),
            ],
            Some(BODY),
        );
        let frame = serde_json::to_vec(&request).unwrap();

        let first = exchange(&mut client, &frame).await;
        assert_eq!(first["accepted"], true);
        assert_eq!(first["status"], 200);

        let second = exchange(&mut client, &frame).await;
        assert_eq!(second["accepted"], false);
        assert_eq!(second["reason"], "REPLAY_DETECTED");
        assert_eq!(second["status"], 409);

        drop(client);
        handler.await.unwrap().unwrap();
        assert_eq!(metrics.accepted(), 1);
        assert_eq!(metrics.rejected(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let (mut client, server) = tokio::io::duplex(4096);
        let metrics = Arc::new(ConnectionMetrics::new());
        tokio::spawn(handle_connection(
            server,
            pipeline(),
            LimitsConfig::default(),
            Arc::clone(&metrics),
        ));

        let reply = exchange(&mut client, b"not json").await;
        assert_eq!(reply["accepted"], false);
        assert_eq!(reply["status"], 400);
        assert_eq!(reply["error"]["code"], "INVALID_MESSAGE");

        let reply = exchange(&mut client, br#"{"headers":{}}"#).await;
        assert_eq!(reply["reason"], "MISSING_SIGNATURE_HEADER");
        assert_eq!(metrics.invalid_frames(), 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (mut client, server) = tokio::io::duplex(4096);
        let limits = LimitsConfig {
            max_message_size: 16,
            ..LimitsConfig::default()
        };
        let handler = tokio::spawn(handle_connection(
            server,
            pipeline(),
            limits,
            Arc::new(ConnectionMetrics::new()),
        ));

        write_message(&mut client, &[b' '; 64]).await.unwrap();
        let result = handler.await.unwrap();
        assert!(matches!(
            result,
            Err(GatewayError::Protocol {
                kind: ProtocolErrorKind::MessageTooLarge { .. }
            })
        ));
    }
}
