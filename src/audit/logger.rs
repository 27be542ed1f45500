//! Audit logger for writing verification outcomes to file.
//!
//! Writes one JSON object per line for easy parsing by log analysis tools.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use crate::error::GatewayError;
use crate::events::{VerificationEvent, VerificationHook};

use super::entry::AuditEntry;

/// Append-only JSON lines audit log.
///
/// Thread-safe via internal mutex. Registered as a [`VerificationHook`] it
/// records every verification the pipeline performs, doing the file write on
/// the blocking pool so async workers never wait on an fsync.
pub struct AuditLogger {
    file: Arc<Mutex<File>>,
    path: PathBuf,
}

impl AuditLogger {
    /// Create a new audit logger.
    ///
    /// Opens the file in append mode.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the audit log file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Parent directory cannot be created
    /// - File cannot be opened for appending
    pub fn new(path: &Path) -> Result<Self, GatewayError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                debug!(path = %parent.display(), "Creating audit log directory");
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        debug!(path = %path.display(), "Audit logger initialized");

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Write one entry as a single line.
    ///
    /// Blocks on the write and the following sync; call it from blocking
    /// context only.
    ///
    /// # Arguments
    ///
    /// * `entry` - The audit entry to log
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn log(&self, entry: &AuditEntry) -> Result<(), GatewayError> {
        let json = serde_json::to_string(entry)?;
        append_line(&self.file, &json)
    }

    /// Get the path to the audit log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append_line(file: &Mutex<File>, line: &str) -> Result<(), GatewayError> {
    let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
    writeln!(file, "{}", line)?;

    if let Err(e) = file.sync_data() {
        warn!(error = %e, "Failed to sync audit log");
    }

    Ok(())
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl VerificationHook for AuditLogger {
    async fn on_verified(&self, event: &VerificationEvent) {
        let json = match serde_json::to_string(&AuditEntry::from_event(event)) {
            Ok(json) => json,
            Err(e) => {
                error!(
                    request_id = %event.request_id,
                    error = %e,
                    "Failed to serialize audit log entry"
                );
                return;
            }
        };

        // The blocking task owns its handle on the file, so the line is still
        // written if the pipeline stops waiting for this hook.
        let file = Arc::clone(&self.file);
        let written = tokio::task::spawn_blocking(move || append_line(&file, &json)).await;

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    request_id = %event.request_id,
                    error = %e,
                    "Failed to write audit log entry"
                );
            }
            Err(e) => {
                error!(
                    request_id = %event.request_id,
                    error = %e,
                    "Audit log write task failed"
                );
            }
        }
    }
}
