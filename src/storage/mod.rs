// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Sealed Storage
//!
//! Durable, encrypted and integrity-checked key/value storage used only
//! from inside the trust boundary.
//!
//! ## Security Model
//!
//! - Every record is split into chunks, each sealed with AES-256-GCM under
//!   the active sealing key
//! - Chunk associated data binds the record key, version, chunk index,
//!   chunk count, length and compression flag, so reordering chunks or
//!   editing the manifest fails authentication
//! - Sealing keys are derived inside the boundary and never persisted;
//!   only their salts and ids are
//! - A bit flip anywhere in a chunk surfaces as `IntegrityViolation`,
//!   never as altered plaintext
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//!   sealed.redb              # manifests, chunks, key metadata (redb, ACID)
//!   platform/master.secret   # boundary master secret (Gramine-encrypted mount)
//!   audit/{date}/events.jsonl
//! ```
//!
//! ## Transactions
//!
//! One writer per store. An explicit transaction buffers operations and
//! applies them inside a single redb write transaction on commit; readers
//! use redb snapshots and never observe uncommitted writes.

pub mod audit;
pub mod boundary_fs;
pub mod compression;
pub mod manifest;
pub mod paths;
pub mod sealed;
pub mod secrets;
pub mod transaction;

use crate::crypto::CryptoError;
use crate::error::{EnclaveError, ErrorKind};

pub use audit::{AuditEvent, AuditEventType, AuditLog};
pub use boundary_fs::BoundaryFs;
pub use manifest::{ChunkEntry, RecordManifest};
pub use paths::StoragePaths;
pub use sealed::{IntegrityReport, KeyIter, SealedStore, StoreOptions, StoreSettings, UsageStats};
pub use secrets::SecretVault;
pub use transaction::{TransactionHandle, TransactionState};

/// Largest logical record accepted by the store.
pub const MAX_RECORD_SIZE: usize = 100 * 1024 * 1024;

/// Longest record key accepted by the store.
pub const MAX_KEY_LEN: usize = 1024;

/// Longest function or secret identifier.
pub const MAX_ID_LEN: usize = 128;

/// Errors produced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("a transaction is already active")]
    TransactionAlreadyActive,

    #[error("unknown or closed transaction {0}")]
    InvalidTransaction(String),

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("record of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage not initialized")]
    NotInitialized,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::InvalidArgument(_)
            | StorageError::AlreadyExists(_)
            | StorageError::InvalidTransaction(_) => ErrorKind::InvalidArgument,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            StorageError::CorruptManifest(_) | StorageError::Serde(_) => {
                ErrorKind::CorruptManifest
            }
            StorageError::TransactionAlreadyActive => ErrorKind::TransactionAlreadyActive,
            StorageError::CommitFailed(_) => ErrorKind::CommitFailed,
            StorageError::TooLarge { .. } => ErrorKind::ResourceLimitExceeded,
            StorageError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            StorageError::NotInitialized
            | StorageError::Unavailable(_)
            | StorageError::Io(_)
            | StorageError::RedbDatabase(_)
            | StorageError::RedbTransaction(_)
            | StorageError::RedbTable(_)
            | StorageError::RedbStorage(_)
            | StorageError::RedbCommit(_) => ErrorKind::StorageUnavailable,
            StorageError::Crypto(e) => e.kind(),
        }
    }
}

impl From<StorageError> for EnclaveError {
    fn from(err: StorageError) -> Self {
        EnclaveError::new(err.kind(), err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Check a function or secret identifier: 1..=128 characters of
/// `[A-Za-z0-9_.-]`.
pub fn validate_identifier(what: &str, id: &str) -> StorageResult<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(StorageError::InvalidArgument(format!(
            "{what} id must be 1..={MAX_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(StorageError::InvalidArgument(format!(
            "{what} id may only contain letters, digits, '_', '-' and '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        assert!(validate_identifier("function", "double").is_ok());
        assert!(validate_identifier("function", "price-feed_v2.1").is_ok());
        assert!(validate_identifier("function", "").is_err());
        assert!(validate_identifier("function", "has space").is_err());
        assert!(validate_identifier("function", "fn:nested").is_err());
        assert!(validate_identifier("function", &"a".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn kinds_distinguish_missing_from_corrupt() {
        assert_eq!(StorageError::NotFound("k".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            StorageError::IntegrityViolation("k".into()).kind(),
            ErrorKind::IntegrityViolation
        );
        assert_eq!(
            StorageError::CorruptManifest("k".into()).kind(),
            ErrorKind::CorruptManifest
        );
        assert_eq!(
            StorageError::Crypto(CryptoError::IntegrityViolation).kind(),
            ErrorKind::IntegrityViolation
        );
    }
}
