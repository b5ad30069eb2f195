// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive boundary operations.
//!
//! Events record who did what to which resource. They never carry secret
//! values, script source, parameters or output.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{BoundaryFs, StorageError, StorageResult};

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Boundary lifecycle
    BoundaryInitialized,
    BoundaryDestroyed,

    // Function events
    FunctionRegistered,
    FunctionUnregistered,
    FunctionExecuted,

    // Secret events
    SecretStored,
    SecretDeleted,
    SecretAccessed,

    // Key and integrity events
    KeyRotated,
    IntegrityViolation,

    // Attestation
    AttestationGenerated,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Caller or owner that triggered the event (if known).
    pub actor: Option<String>,
    /// Resource type (function, secret, record, key).
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    /// Error kind if the operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            actor: None,
            resource_type: None,
            resource_id: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only JSONL audit log, one file per day.
pub struct AuditLog<'a> {
    fs: &'a BoundaryFs,
}

impl<'a> AuditLog<'a> {
    pub fn new(fs: &'a BoundaryFs) -> Self {
        Self { fs }
    }

    pub fn log(&self, event: &AuditEvent) -> StorageResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let path = self.fs.paths().audit_events_file(&date);
        let line = serde_json::to_string(event)?;
        self.fs.append_line(&path, &line)
    }

    /// Log and swallow failures. Auditing must not fail the audited
    /// operation.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event) {
            tracing::warn!(event_type = ?event.event_type, error = %e, "Failed to write audit event");
        }
    }

    /// Read audit events for a specific date (`YYYY-MM-DD`).
    pub fn read_events(&self, date: &str) -> StorageResult<Vec<AuditEvent>> {
        let path = self.fs.paths().audit_events_file(date);
        let content = match self.fs.read_raw(&path) {
            Ok(content) => content,
            Err(StorageError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let content = String::from_utf8(content).map_err(|e| {
            StorageError::CorruptManifest(format!("invalid UTF-8 in audit log: {e}"))
        })?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }

    /// Read events for an inclusive date range.
    pub fn read_events_range(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> StorageResult<Vec<AuditEvent>> {
        let parse = |raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| StorageError::InvalidArgument(format!("invalid date {raw}: {e}")))
        };
        let start = parse(start_date)?;
        let end = parse(end_date)?;

        let mut all_events = Vec::new();
        let mut current = start;
        while current <= end {
            all_events.extend(self.read_events(&current.format("%Y-%m-%d").to_string())?);
            current = current
                .succ_opt()
                .ok_or_else(|| StorageError::InvalidArgument("date overflow".to_string()))?;
        }
        Ok(all_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BoundaryFs) {
        let temp = TempDir::new().unwrap();
        let mut fs = BoundaryFs::new(StoragePaths::new(temp.path()));
        fs.initialize().unwrap();
        (temp, fs)
    }

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::FunctionRegistered)
            .with_actor("owner1")
            .with_resource("function", "double");

        assert_eq!(event.event_type, AuditEventType::FunctionRegistered);
        assert_eq!(event.actor.as_deref(), Some("owner1"));
        assert_eq!(event.resource_id.as_deref(), Some("double"));
        assert!(event.success);
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::SecretAccessed)
            .with_actor("intruder")
            .failed("PermissionDenied");

        assert!(!event.success);
        assert_eq!(event.error.as_deref(), Some("PermissionDenied"));
    }

    #[test]
    fn log_and_read_events() {
        let (_temp, fs) = setup();
        let audit = AuditLog::new(&fs);

        audit
            .log(&AuditEvent::new(AuditEventType::SecretStored).with_resource("secret", "api-key"))
            .unwrap();
        audit.record(AuditEvent::new(AuditEventType::KeyRotated));

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = audit.read_events(&today).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::SecretStored);
        assert_eq!(events[1].event_type, AuditEventType::KeyRotated);

        let ranged = audit.read_events_range(&today, &today).unwrap();
        assert_eq!(ranged.len(), 2);
    }

    #[test]
    fn missing_day_is_empty() {
        let (_temp, fs) = setup();
        assert!(AuditLog::new(&fs).read_events("1999-01-01").unwrap().is_empty());
    }
}
