//! Post-verification hooks.
//!
//! Every verification result is handed to a [`VerificationHook`] once the
//! pipeline has decided. Hooks observe; they never change the outcome and
//! never block the caller for long.
//!
//! ```text
//! ┌──────────────────────┐  VerificationEvent  ┌───────────────┐
//! │ VerificationPipeline │ ───────────────────▶│ MulticastHook │
//! └──────────────────────┘                     └───────────────┘
//!                                                 │         │
//!                                                 ▼         ▼
//!                                        ┌─────────────┐ ┌─────────────┐
//!                                        │ AuditLogger │ │ ChannelHook │──▶ mpsc
//!                                        └─────────────┘ └─────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

use crate::pipeline::VerificationResult;

/// A finished verification, as seen by hooks.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationEvent {
    pub request_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub result: VerificationResult,
}

impl VerificationEvent {
    pub fn new(request_id: Uuid, occurred_at: DateTime<Utc>, result: VerificationResult) -> Self {
        Self {
            request_id,
            occurred_at,
            result,
        }
    }
}

/// Observer of verification outcomes.
///
/// Implementations must not fail the verification: errors are logged and
/// swallowed.
#[async_trait::async_trait]
pub trait VerificationHook: Send + Sync + std::fmt::Debug {
    async fn on_verified(&self, event: &VerificationEvent);
}

/// Hook that discards all events.
#[derive(Debug, Default)]
pub struct NoOpHook;

#[async_trait::async_trait]
impl VerificationHook for NoOpHook {
    async fn on_verified(&self, _event: &VerificationEvent) {}
}

/// Forwards events into a bounded channel.
///
/// A full or closed channel drops the event with a warning; verification
/// never waits on the consumer.
#[derive(Debug, Clone)]
pub struct ChannelHook {
    sender: mpsc::Sender<VerificationEvent>,
    rejections_only: bool,
}

impl ChannelHook {
    /// Create a hook and the receiving end of its channel.
    ///
    /// A `capacity` of zero is treated as one.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<VerificationEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                rejections_only: false,
            },
            receiver,
        )
    }

    /// Forward only rejected verifications (alerting use).
    pub fn rejections_only(mut self) -> Self {
        self.rejections_only = true;
        self
    }
}

#[async_trait::async_trait]
impl VerificationHook for ChannelHook {
    async fn on_verified(&self, event: &VerificationEvent) {
        if self.rejections_only && event.result.is_accepted() {
            return;
        }

        match self.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    request_id = %event.request_id,
                    "Verification event channel full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    request_id = %event.request_id,
                    "Verification event channel closed, dropping event"
                );
            }
        }
    }
}

/// Fans each event out to several hooks concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastHook {
    hooks: Vec<Arc<dyn VerificationHook>>,
}

impl MulticastHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscriber(&mut self, hook: Arc<dyn VerificationHook>) {
        self.hooks.push(hook);
    }

    pub fn subscriber_count(&self) -> usize {
        self.hooks.len()
    }
}

#[async_trait::async_trait]
impl VerificationHook for MulticastHook {
    async fn on_verified(&self, event: &VerificationEvent) {
        let futures = self.hooks.iter().map(|hook| hook.on_verified(event));
        futures::future::join_all(futures).await;
    }
}
