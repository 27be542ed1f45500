//! Unix socket listener.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{GatewayError, ProtocolErrorKind};
use crate::pipeline::VerificationPipeline;

use super::handle_connection;

/// Upper bound on waiting for in-flight connections at shutdown.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection metrics for monitoring.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Webhooks accepted by the pipeline.
    pub requests_accepted: AtomicU64,
    /// Webhooks rejected by the pipeline.
    pub requests_rejected: AtomicU64,
    /// Frames that could not be parsed.
    pub invalid_frames: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicUsize,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one pipeline verdict.
    pub fn record_verification(&self, accepted: bool) {
        if accepted {
            self.requests_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_invalid_frame(&self) {
        self.invalid_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.requests_accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.requests_rejected.load(Ordering::Relaxed)
    }

    pub fn invalid_frames(&self) -> u64 {
        self.invalid_frames.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Unix socket server.
pub struct SocketListener {
    listener: UnixListener,
    settings: Arc<Settings>,
    pipeline: Arc<VerificationPipeline>,
    metrics: Arc<ConnectionMetrics>,
    /// Semaphore for connection limiting
    connection_semaphore: Arc<Semaphore>,
}

impl SocketListener {
    /// Create and bind a new socket listener.
    ///
    /// Replaces a stale socket file left by a previous run and applies the
    /// configured permissions before any client can connect.
    ///
    /// # Arguments
    ///
    /// * `settings` - Daemon settings; `[socket]` and `[limits]` are read here
    /// * `pipeline` - Pipeline every connection verifies against
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The socket path is a symlink
    /// - A stale socket file cannot be removed
    /// - The socket cannot be bound or its permissions set
    pub async fn bind(
        settings: Arc<Settings>,
        pipeline: Arc<VerificationPipeline>,
    ) -> Result<Self, GatewayError> {
        let socket_path = &settings.socket.path;

        // symlink_metadata so a planted symlink is never followed
        if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
            if metadata.file_type().is_symlink() {
                return Err(GatewayError::Socket {
                    message: format!(
                        "Socket path {} is a symlink, refusing to remove for security",
                        socket_path.display()
                    ),
                });
            }

            std::fs::remove_file(socket_path).map_err(|e| GatewayError::Socket {
                message: format!(
                    "Failed to remove existing socket file {}: {}",
                    socket_path.display(),
                    e
                ),
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GatewayError::Socket {
                message: format!(
                    "Failed to create socket directory {}: {}",
                    parent.display(),
                    e
                ),
            })?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| GatewayError::Socket {
            message: format!("Failed to bind to socket {}: {}", socket_path.display(), e),
        })?;

        Self::set_socket_permissions(socket_path, &settings.socket.permissions)?;

        let connection_semaphore =
            Arc::new(Semaphore::new(settings.limits.max_concurrent_connections));
        info!(
            max_connections = settings.limits.max_concurrent_connections,
            "Connection limiting enabled"
        );

        info!(path = %socket_path.display(), "Socket listener bound");

        Ok(Self {
            listener,
            settings,
            pipeline,
            metrics: Arc::new(ConnectionMetrics::new()),
            connection_semaphore,
        })
    }

    /// Get connection metrics.
    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    fn set_socket_permissions(path: &Path, permissions_str: &str) -> Result<(), GatewayError> {
        let mode = u32::from_str_radix(permissions_str, 8).map_err(|e| GatewayError::Socket {
            message: format!("Invalid socket permissions '{}': {}", permissions_str, e),
        })?;

        let permissions = std::fs::Permissions::from_mode(mode);
        std::fs::set_permissions(path, permissions).map_err(|e| GatewayError::Socket {
            message: format!(
                "Failed to set socket permissions on {}: {}",
                path.display(),
                e
            ),
        })?;

        Ok(())
    }

    /// Run the socket listener, accepting connections.
    ///
    /// Stops accepting when `shutdown` is notified. Active connections run
    /// until their client closes or times out.
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Notified once to stop the accept loop
    ///
    /// # Errors
    ///
    /// Accept failures are logged and skipped, so this currently only returns
    /// `Ok` once shutdown is requested.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), GatewayError> {
        info!("Socket listener running, waiting for connections...");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let semaphore = Arc::clone(&self.connection_semaphore);
                            let permit = match semaphore.try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        max = self.settings.limits.max_concurrent_connections,
                                        "Connection limit reached, rejecting connection"
                                    );
                                    continue;
                                }
                            };

                            let pipeline = Arc::clone(&self.pipeline);
                            let limits = self.settings.limits.clone();
                            let metrics = Arc::clone(&self.metrics);

                            metrics.connections_total.fetch_add(1, Ordering::Relaxed);
                            metrics.active_connections.fetch_add(1, Ordering::Relaxed);
                            debug!(active = metrics.active(), "New connection accepted");

                            tokio::spawn(async move {
                                let _permit = permit;
                                let result = handle_connection(
                                    stream,
                                    pipeline,
                                    limits,
                                    Arc::clone(&metrics),
                                )
                                .await;

                                if let Err(e) = &result {
                                    if !matches!(
                                        e,
                                        GatewayError::Protocol {
                                            kind: ProtocolErrorKind::ConnectionClosed
                                        }
                                    ) {
                                        error!(error = %e, "Connection handler error");
                                    }
                                }

                                metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
                                debug!(active = metrics.active(), "Connection closed");
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Wait for active connections to drain, at most `limit`.
    ///
    /// # Arguments
    ///
    /// * `limit` - Longest time to wait before giving up
    ///
    /// # Returns
    ///
    /// `true` if every connection finished in time.
    pub async fn wait_for_drain(&self, limit: Duration) -> bool {
        let poll_interval = Duration::from_millis(100);

        let drained = tokio::time::timeout(limit, async {
            while self.metrics.active() > 0 {
                debug!(active = self.metrics.active(), "Waiting for connections to drain");
                tokio::time::sleep(poll_interval).await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!("All connections drained");
        } else {
            warn!(
                active = self.metrics.active(),
                "Drain timeout elapsed with connections still open"
            );
        }
        drained
    }
}
