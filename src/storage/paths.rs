// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the boundary storage layout.

use std::path::{Path, PathBuf};

/// Base directory for all persistent boundary storage.
/// Under Gramine this MUST be mounted as `type = "encrypted"`.
pub const DATA_ROOT: &str = "/data";

/// Storage path utilities for one boundary instance.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all boundary data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Sealed Store ==========

    /// redb database holding manifests, chunks and key metadata.
    pub fn sealed_db(&self) -> PathBuf {
        self.root.join("sealed.redb")
    }

    // ========== Platform Paths ==========

    /// Directory for platform identity material.
    pub fn platform_dir(&self) -> PathBuf {
        self.root.join("platform")
    }

    /// Master secret from which sealing keys are derived.
    pub fn master_secret(&self) -> PathBuf {
        self.platform_dir().join("master.secret")
    }

    // ========== Audit Log Paths ==========

    /// Directory containing audit logs.
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Directory for a specific date's audit logs.
    pub fn audit_date_dir(&self, date: &str) -> PathBuf {
        self.audit_dir().join(date)
    }

    /// Path to a daily audit events file (JSONL format).
    pub fn audit_events_file(&self, date: &str) -> PathBuf {
        self.audit_date_dir(date).join("events.jsonl")
    }
}
