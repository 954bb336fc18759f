//! Audit logging for committed administrative changes
//!
//! One JSON object per line, appended to the configured file and mirrored to
//! the `audit` tracing target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Audit log event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    NodeRegistered,
    NodeRemoved,
    StorageGroupCreated,
    StorageGroupDeleted,
    AuthorChanged,
    LoginFailed,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventType,
    pub actor: String,
    pub target: Option<String>,
    pub message: String,
}

/// Audit logger, owned by the coordinator
pub struct AuditLogger {
    file: Option<Mutex<File>>,
}

impl AuditLogger {
    /// Append to `path`; the file is created if missing.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    /// Tracing output only
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Log an audit entry
    pub fn log(&self, entry: AuditEntry) {
        let line = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                if let Err(e) = writeln!(f, "{}", line) {
                    tracing::warn!("audit write failed: {}", e);
                }
            }
        }
        tracing::info!(target: "audit", "{}", line);
    }

    /// Convenience for logging an event
    pub fn log_event(
        &self,
        event: AuditEventType,
        actor: impl Into<String>,
        target: Option<String>,
        message: impl Into<String>,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let logger = AuditLogger::open(&path).unwrap();
        logger.log_event(
            AuditEventType::StorageGroupCreated,
            "confignode-1",
            Some("root.sg1".to_string()),
            "storage group created",
        );
        drop(logger);

        let text = std::fs::read_to_string(&path).unwrap();
        let entry: AuditEntry = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(entry.event, AuditEventType::StorageGroupCreated);
        assert_eq!(entry.target.as_deref(), Some("root.sg1"));
    }
}
