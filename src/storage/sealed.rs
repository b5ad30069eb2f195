// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sealed key/value store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `manifests`: record key → JSON [`RecordManifest`]
//! - `chunks`: `key ‖ 0x00 ‖ version ‖ index` → `nonce ‖ tag ‖ ciphertext`
//! - `manifest_history`: `key ‖ 0x00 ‖ version` → JSON manifest of a
//!   retained older version
//! - `sealing_keys`: key id → JSON [`SealingKeyInfo`] (no key material)
//! - `meta`: `active_key_id` → key id
//!
//! ## Write Path
//!
//! Every mutation, explicit transaction or not, is applied through
//! one internal `apply` step: a single redb write transaction committed
//! only if every buffered operation succeeded. Data is compressed, split
//! and sealed at apply time under the key that is active at that moment.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use redb::{
    Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction,
};
use serde::Serialize;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use super::compression::{compress_if_smaller, decompress};
use super::manifest::{
    chunk_aad, chunk_key, history_key, record_range, validate_record_key, version_chunk_range,
    ChunkEntry, RecordManifest,
};
use super::transaction::{OpenTransaction, StagedOp, TransactionHandle, TransactionState};
use super::{StoragePaths, StorageError, StorageResult, MAX_RECORD_SIZE};
use crate::config::{EnclaveConfig, DEFAULT_CHUNK_SIZE};
use crate::crypto::kdf::RECOMMENDED_ITERATIONS;
use crate::crypto::{sha256_hex, KeyRing, SealedBox, SealingKey, SealingKeyInfo};
use crate::retry::RetryPolicy;

// =============================================================================
// Table Definitions
// =============================================================================

const MANIFESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("manifests");

const CHUNKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("chunks");

const MANIFEST_HISTORY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("manifest_history");

const SEALING_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("sealing_keys");

const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

const ACTIVE_KEY_ID: &str = "active_key_id";

type ManifestTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type ChunkTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

/// Keys fetched per read snapshot by [`KeyIter`].
const LIST_PAGE_SIZE: usize = 64;

/// Closed transactions remembered for [`SealedStore::transaction_state`].
const RECENT_TRANSACTIONS: usize = 32;

// =============================================================================
// Options and Reports
// =============================================================================

/// Per-write options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub encrypt: bool,
    pub compress: bool,
    /// `0` uses the store default.
    pub chunk_size_bytes: usize,
    /// Permit an empty key or a zero-length payload.
    pub allow_empty: bool,
    /// Fail with `AlreadyExists` instead of writing a new version.
    pub create_only: bool,
    /// Keep the previous version readable through
    /// [`SealedStore::retrieve_version`].
    pub keep_versions: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            encrypt: true,
            compress: false,
            chunk_size_bytes: 0,
            allow_empty: false,
            create_only: false,
            keep_versions: false,
        }
    }
}

impl StoreOptions {
    pub fn compressed() -> Self {
        Self {
            compress: true,
            ..Self::default()
        }
    }

    pub fn create_only() -> Self {
        Self {
            create_only: true,
            ..Self::default()
        }
    }
}

/// Store-wide settings fixed at construction.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub kdf_iterations: u32,
    pub chunk_size_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kdf_iterations: RECOMMENDED_ITERATIONS,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreSettings {
    pub fn from_config(config: &EnclaveConfig) -> Self {
        Self {
            kdf_iterations: config.kdf_iterations,
            chunk_size_bytes: config.effective_chunk_size(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a full integrity scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub total_keys: usize,
    pub corrupt_keys: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt_keys.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_keys: usize,
    pub total_plaintext_bytes: u64,
    pub total_stored_bytes: u64,
    /// Stored bytes divided by plaintext bytes (1.0 for an empty store).
    pub compression_ratio: f64,
}

// =============================================================================
// SealedStore
// =============================================================================

struct Opened {
    db: Database,
    keys: KeyRing,
}

/// Durable sealed storage for one boundary instance.
pub struct SealedStore {
    paths: StoragePaths,
    master_secret: Zeroizing<Vec<u8>>,
    settings: StoreSettings,
    opened: Option<Opened>,
    /// The single writer slot.
    writer: Mutex<Option<OpenTransaction>>,
    recent: Mutex<LruCache<Uuid, TransactionState>>,
    #[cfg(test)]
    commit_fault: Mutex<Option<usize>>,
}

impl SealedStore {
    /// Does NOT open the database. Call `initialize()` first.
    pub fn new(paths: StoragePaths, master_secret: Zeroizing<Vec<u8>>, settings: StoreSettings) -> Self {
        let capacity = NonZeroUsize::new(RECENT_TRANSACTIONS).unwrap_or(NonZeroUsize::MIN);
        Self {
            paths,
            master_secret,
            settings,
            opened: None,
            writer: Mutex::new(None),
            recent: Mutex::new(LruCache::new(capacity)),
            #[cfg(test)]
            commit_fault: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.opened.is_some()
    }

    /// Open the database, create tables and load the sealing keys.
    /// Safe to call multiple times.
    pub fn initialize(&mut self) -> StorageResult<bool> {
        if self.opened.is_some() {
            return Ok(true);
        }

        let path = self.paths.sealed_db();
        let db = self.settings.retry.run(
            "open sealed store",
            || open_database(&path),
            |e: &StorageError| e.kind().is_transient(),
        )?;
        let keys = self.load_or_create_keys(&db)?;

        tracing::info!(
            path = %path.display(),
            active_key = %keys.active()?.id(),
            "Sealed store initialized"
        );
        self.opened = Some(Opened { db, keys });
        Ok(true)
    }

    fn load_or_create_keys(&self, db: &Database) -> StorageResult<KeyRing> {
        let write_txn = db.begin_write()?;
        let ring = {
            let _ = write_txn.open_table(MANIFESTS)?;
            let _ = write_txn.open_table(CHUNKS)?;
            let _ = write_txn.open_table(MANIFEST_HISTORY)?;
            let mut key_table = write_txn.open_table(SEALING_KEYS)?;
            let mut meta = write_txn.open_table(META)?;

            let active_id = meta.get(ACTIVE_KEY_ID)?.map(|v| v.value().to_string());
            match active_id {
                Some(active_id) => {
                    let mut infos = Vec::new();
                    for entry in key_table.iter()? {
                        let (_, value) = entry?;
                        infos.push(serde_json::from_slice::<SealingKeyInfo>(value.value())?);
                    }
                    let active_info = infos
                        .iter()
                        .find(|info| info.key_id == active_id)
                        .cloned()
                        .ok_or_else(|| {
                            StorageError::IntegrityViolation(format!(
                                "active sealing key {active_id} has no metadata"
                            ))
                        })?;
                    let ring = KeyRing::new(self.restore_key(active_info)?);
                    for info in infos.into_iter().filter(|info| info.key_id != active_id) {
                        ring.insert(self.restore_key(info)?)?;
                    }
                    ring
                }
                None => {
                    let key = SealingKey::generate(
                        &self.master_secret,
                        self.settings.kdf_iterations,
                        None,
                    )?;
                    let info = serde_json::to_vec(key.info())?;
                    key_table.insert(key.id(), info.as_slice())?;
                    meta.insert(ACTIVE_KEY_ID, key.id())?;
                    tracing::info!(key_id = %key.id(), "Generated initial sealing key");
                    KeyRing::new(key)
                }
            }
        };
        write_txn.commit()?;
        Ok(ring)
    }

    fn restore_key(&self, info: SealingKeyInfo) -> StorageResult<SealingKey> {
        let key_id = info.key_id.clone();
        SealingKey::restore(&self.master_secret, info).map_err(|e| {
            StorageError::IntegrityViolation(format!("cannot restore sealing key {key_id}: {e}"))
        })
    }

    fn opened(&self) -> StorageResult<&Opened> {
        self.opened.as_ref().ok_or(StorageError::NotInitialized)
    }

    fn lock_writer(&self) -> StorageResult<MutexGuard<'_, Option<OpenTransaction>>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Unavailable("writer lock poisoned".to_string()))
    }

    fn remember(&self, id: Uuid, state: TransactionState) {
        if let Ok(mut recent) = self.recent.lock() {
            recent.put(id, state);
        }
    }

    // =========================================================================
    // Single-operation writes
    // =========================================================================

    /// Store `data` under `key` as a new version.
    pub fn store(&self, key: &str, data: &[u8], options: &StoreOptions) -> StorageResult<bool> {
        let opened = self.opened()?;
        let op = stage_put(key, data, options)?;

        let writer = self.lock_writer()?;
        if writer.is_some() {
            return Err(StorageError::TransactionAlreadyActive);
        }
        self.apply(opened, std::slice::from_ref(&op))?;
        drop(writer);

        tracing::debug!(key = %key, bytes = data.len(), "Stored record");
        Ok(true)
    }

    /// Remove the manifest, every chunk and all retained versions of `key`.
    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        let opened = self.opened()?;
        validate_record_key(key, true)?;

        let writer = self.lock_writer()?;
        if writer.is_some() {
            return Err(StorageError::TransactionAlreadyActive);
        }
        self.apply(
            opened,
            &[StagedOp::Delete {
                key: key.to_string(),
            }],
        )?;
        drop(writer);

        tracing::debug!(key = %key, "Deleted record");
        Ok(true)
    }

    // =========================================================================
    // Explicit transactions
    // =========================================================================

    /// Open the store's single write transaction.
    pub fn begin_transaction(&self) -> StorageResult<TransactionHandle> {
        self.opened()?;
        let mut writer = self.lock_writer()?;
        if writer.is_some() {
            return Err(StorageError::TransactionAlreadyActive);
        }
        let handle = TransactionHandle::new();
        *writer = Some(OpenTransaction::new(&handle));
        tracing::debug!(txn = %handle.id(), "Transaction opened");
        Ok(handle)
    }

    /// Buffer a write. Nothing is visible until commit.
    pub fn put(
        &self,
        handle: &TransactionHandle,
        key: &str,
        data: &[u8],
        options: &StoreOptions,
    ) -> StorageResult<()> {
        let op = stage_put(key, data, options)?;
        let mut writer = self.lock_writer()?;
        open_slot(&mut writer, handle)?.ops.push(op);
        Ok(())
    }

    /// Buffer a delete. A delete of a key that does not exist at commit
    /// time rejects the whole transaction.
    pub fn delete_in(&self, handle: &TransactionHandle, key: &str) -> StorageResult<()> {
        validate_record_key(key, true)?;
        let mut writer = self.lock_writer()?;
        open_slot(&mut writer, handle)?.ops.push(StagedOp::Delete {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Apply every buffered operation or none of them.
    pub fn commit(&self, handle: TransactionHandle) -> StorageResult<bool> {
        let opened = self.opened()?;
        let mut writer = self.lock_writer()?;
        open_slot(&mut writer, &handle)?;
        let txn = writer
            .take()
            .ok_or_else(|| StorageError::InvalidTransaction(handle.id().to_string()))?;

        let result = self.apply(opened, &txn.ops);
        drop(writer);

        match result {
            Ok(()) => {
                self.remember(txn.id, TransactionState::Committed);
                tracing::debug!(txn = %txn.id, ops = txn.ops.len(), "Transaction committed");
                Ok(true)
            }
            Err(e) => {
                self.remember(txn.id, TransactionState::RolledBack);
                tracing::warn!(txn = %txn.id, error = %e, "Transaction commit failed, nothing applied");
                Err(StorageError::CommitFailed(e.to_string()))
            }
        }
    }

    /// Discard every buffered operation.
    pub fn rollback(&self, handle: TransactionHandle) -> StorageResult<bool> {
        let mut writer = self.lock_writer()?;
        open_slot(&mut writer, &handle)?;
        *writer = None;
        drop(writer);

        self.remember(handle.id(), TransactionState::RolledBack);
        tracing::debug!(txn = %handle.id(), "Transaction rolled back");
        Ok(true)
    }

    /// State of a transaction opened on this store, if still remembered.
    pub fn transaction_state(&self, id: Uuid) -> Option<TransactionState> {
        if let Ok(writer) = self.writer.lock() {
            if writer.as_ref().is_some_and(|txn| txn.id == id) {
                return Some(TransactionState::Open);
            }
        }
        self.recent
            .lock()
            .ok()
            .and_then(|mut recent| recent.get(&id).copied())
    }

    // =========================================================================
    // Apply
    // =========================================================================

    fn apply(&self, opened: &Opened, ops: &[StagedOp]) -> StorageResult<()> {
        let active = opened.keys.active()?;
        let write_txn = opened.db.begin_write()?;

        match self.apply_ops(&write_txn, ops, &active) {
            Ok(()) => {
                write_txn.commit()?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = write_txn.abort() {
                    tracing::error!(error = %abort_err, "Failed to abort write transaction");
                }
                Err(e)
            }
        }
    }

    fn apply_ops(
        &self,
        write_txn: &WriteTransaction,
        ops: &[StagedOp],
        active: &SealingKey,
    ) -> StorageResult<()> {
        let mut manifests = write_txn.open_table(MANIFESTS)?;
        let mut chunks = write_txn.open_table(CHUNKS)?;
        let mut history = write_txn.open_table(MANIFEST_HISTORY)?;

        for (position, op) in ops.iter().enumerate() {
            #[cfg(test)]
            self.trip_commit_fault(position)?;
            #[cfg(not(test))]
            let _ = position;

            match op {
                StagedOp::Put { key, data, options } => {
                    let write = RecordWrite {
                        chunk_size: if options.chunk_size_bytes == 0 {
                            self.default_chunk_size()
                        } else {
                            options.chunk_size_bytes
                        },
                        options,
                        active,
                    };
                    write.apply(&mut manifests, &mut chunks, &mut history, key, data)?;
                }
                StagedOp::Delete { key } => {
                    if manifests.remove(key.as_str())?.is_none() {
                        return Err(StorageError::NotFound(op.key().to_string()));
                    }
                    let (start, end) = record_range(key);
                    remove_range(&mut chunks, &start, &end)?;
                    remove_range(&mut history, &start, &end)?;
                }
            }
        }
        Ok(())
    }

    fn default_chunk_size(&self) -> usize {
        if self.settings.chunk_size_bytes == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.settings.chunk_size_bytes
        }
    }

    // =========================================================================
    // Reads (snapshot)
    // =========================================================================

    /// Decrypt, verify and reassemble the current version of `key`.
    pub fn retrieve(&self, key: &str) -> StorageResult<Vec<u8>> {
        let opened = self.opened()?;
        validate_record_key(key, true)?;

        let read_txn = opened.db.begin_read()?;
        let manifests = read_txn.open_table(MANIFESTS)?;
        let manifest = load_manifest(&manifests, key)?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let chunks = read_txn.open_table(CHUNKS)?;

        self.read_record(opened, &manifest, key, &chunks)
            .inspect_err(|e| {
                if e.kind().is_integrity_failure() {
                    tracing::warn!(key = %key, error = %e, "Integrity check failed on retrieve");
                }
            })
    }

    /// Read a specific version: the current one or one retained with
    /// `keep_versions`.
    pub fn retrieve_version(&self, key: &str, version: u32) -> StorageResult<Vec<u8>> {
        let opened = self.opened()?;
        validate_record_key(key, true)?;

        let read_txn = opened.db.begin_read()?;
        let manifests = read_txn.open_table(MANIFESTS)?;
        let manifest = match load_manifest(&manifests, key)? {
            Some(current) if current.version == version => current,
            _ => {
                let history = read_txn.open_table(MANIFEST_HISTORY)?;
                let raw = history
                    .get(history_key(key, version).as_slice())?
                    .map(|v| v.value().to_vec())
                    .ok_or_else(|| StorageError::NotFound(format!("{key}@{version}")))?;
                serde_json::from_slice(&raw)?
            }
        };
        let chunks = read_txn.open_table(CHUNKS)?;
        self.read_record(opened, &manifest, key, &chunks)
    }

    pub fn exists(&self, key: &str) -> StorageResult<bool> {
        let opened = self.opened()?;
        let read_txn = opened.db.begin_read()?;
        let manifests = read_txn.open_table(MANIFESTS)?;
        Ok(manifests.get(key)?.is_some())
    }

    /// Manifest of the current version, without reading any chunk.
    pub fn metadata(&self, key: &str) -> StorageResult<RecordManifest> {
        let opened = self.opened()?;
        let read_txn = opened.db.begin_read()?;
        let manifests = read_txn.open_table(MANIFESTS)?;
        let manifest = load_manifest(&manifests, key)?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        manifest.validate(key)?;
        Ok(manifest)
    }

    /// Lazily enumerate keys starting with `prefix`. Each call starts a
    /// fresh enumeration of the committed state.
    pub fn list_keys(&self, prefix: Option<&str>) -> KeyIter<'_> {
        KeyIter {
            store: self,
            prefix: prefix.unwrap_or_default().to_string(),
            cursor: None,
            page: VecDeque::new(),
            done: false,
        }
    }

    fn list_page(&self, prefix: &str, cursor: Option<&str>) -> StorageResult<(Vec<String>, bool)> {
        let opened = self.opened()?;
        let read_txn = opened.db.begin_read()?;
        let manifests = read_txn.open_table(MANIFESTS)?;

        let start = cursor.unwrap_or(prefix);
        let mut skip_first = cursor.is_some();
        let mut page = Vec::with_capacity(LIST_PAGE_SIZE);

        for entry in manifests.range(start..)? {
            let (key, _) = entry?;
            let key = key.value();
            if skip_first {
                skip_first = false;
                if Some(key) == cursor {
                    continue;
                }
            }
            if !key.starts_with(prefix) {
                return Ok((page, true));
            }
            page.push(key.to_string());
            if page.len() == LIST_PAGE_SIZE {
                return Ok((page, false));
            }
        }
        Ok((page, true))
    }

    fn read_record(
        &self,
        opened: &Opened,
        manifest: &RecordManifest,
        key: &str,
        chunks: &impl ReadableTable<&'static [u8], &'static [u8]>,
    ) -> StorageResult<Vec<u8>> {
        manifest.validate(key)?;

        let sealing_key = match (&manifest.key_id, manifest.encrypted) {
            (Some(key_id), true) => Some(opened.keys.get(key_id)?),
            _ => None,
        };

        let mut stored = Zeroizing::new(Vec::with_capacity(manifest.stored_length as usize));
        for entry in &manifest.chunks {
            let raw = chunks
                .get(chunk_key(key, manifest.version, entry.index).as_slice())?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| {
                    StorageError::CorruptManifest(format!("{key}: chunk {} missing", entry.index))
                })?;
            if raw.len() as u64 != entry.length {
                return Err(StorageError::IntegrityViolation(format!(
                    "{key}: chunk {} has unexpected length",
                    entry.index
                )));
            }

            match &sealing_key {
                Some(sealing_key) => {
                    let sealed = SealedBox::from_bytes(&raw)?;
                    let aad = chunk_aad(
                        key,
                        manifest.version,
                        entry.index,
                        manifest.chunk_count,
                        manifest.compressed,
                        manifest.plaintext_length,
                    );
                    let plain = Zeroizing::new(sealing_key.unseal(&sealed, &aad)?);
                    stored.extend_from_slice(&plain);
                }
                None => {
                    if entry.digest.as_deref() != Some(sha256_hex(&raw).as_str()) {
                        return Err(StorageError::IntegrityViolation(format!(
                            "{key}: chunk {} digest mismatch",
                            entry.index
                        )));
                    }
                    stored.extend_from_slice(&raw);
                }
            }
        }

        if stored.len() as u64 != manifest.stored_length {
            return Err(StorageError::CorruptManifest(format!(
                "{key}: reassembled length does not match manifest"
            )));
        }

        let mut plaintext = if manifest.compressed {
            decompress(&stored, manifest.plaintext_length as usize)?
        } else {
            std::mem::take(&mut *stored)
        };

        if plaintext.len() as u64 != manifest.plaintext_length {
            plaintext.zeroize();
            return Err(StorageError::CorruptManifest(format!(
                "{key}: plaintext length does not match manifest"
            )));
        }
        if let Some(expected) = &manifest.content_hash {
            if sha256_hex(&plaintext) != *expected {
                plaintext.zeroize();
                return Err(StorageError::IntegrityViolation(format!(
                    "{key}: content hash mismatch"
                )));
            }
        }
        Ok(plaintext)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Re-verify every record: manifest structure, every tag or digest and
    /// the reassembled plaintext.
    pub fn validate_integrity(&self) -> StorageResult<IntegrityReport> {
        let opened = self.opened()?;
        let read_txn = opened.db.begin_read()?;
        let manifests = read_txn.open_table(MANIFESTS)?;
        let chunks = read_txn.open_table(CHUNKS)?;

        let mut total_keys = 0;
        let mut corrupt_keys = Vec::new();
        for entry in manifests.iter()? {
            let (key, value) = entry?;
            let key = key.value().to_string();
            total_keys += 1;

            let checked = serde_json::from_slice::<RecordManifest>(value.value())
                .map_err(StorageError::from)
                .and_then(|manifest| self.read_record(opened, &manifest, &key, &chunks));
            match checked {
                Ok(data) => drop(Zeroizing::new(data)),
                Err(e) if e.kind().is_integrity_failure() => {
                    tracing::warn!(key = %key, error = %e, "Corrupt record found");
                    corrupt_keys.push(key);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(total_keys, corrupt = corrupt_keys.len(), "Integrity scan finished");
        Ok(IntegrityReport {
            total_keys,
            corrupt_keys,
            checked_at: Utc::now(),
        })
    }

    pub fn usage_stats(&self) -> StorageResult<UsageStats> {
        let opened = self.opened()?;
        let read_txn = opened.db.begin_read()?;
        let manifests = read_txn.open_table(MANIFESTS)?;

        let mut stats = UsageStats {
            total_keys: 0,
            total_plaintext_bytes: 0,
            total_stored_bytes: 0,
            compression_ratio: 1.0,
        };
        for entry in manifests.iter()? {
            let (_, value) = entry?;
            let manifest: RecordManifest = serde_json::from_slice(value.value())?;
            stats.total_keys += 1;
            stats.total_plaintext_bytes += manifest.plaintext_length;
            stats.total_stored_bytes += manifest.chunks.iter().map(|c| c.length).sum::<u64>();
        }
        if stats.total_plaintext_bytes > 0 {
            stats.compression_ratio =
                stats.total_stored_bytes as f64 / stats.total_plaintext_bytes as f64;
        }
        Ok(stats)
    }

    /// Derive a new sealing key and make it active. Records sealed under
    /// the previous key stay readable until resealed.
    pub fn rotate_key(&self) -> StorageResult<SealingKeyInfo> {
        let opened = self.opened()?;
        let previous = opened.keys.active()?;
        let key = SealingKey::generate(
            &self.master_secret,
            self.settings.kdf_iterations,
            Some(previous.id().to_string()),
        )?;
        let info = key.info().clone();

        let write_txn = opened.db.begin_write()?;
        {
            let mut key_table = write_txn.open_table(SEALING_KEYS)?;
            let json = serde_json::to_vec(&info)?;
            key_table.insert(info.key_id.as_str(), json.as_slice())?;
            let mut meta = write_txn.open_table(META)?;
            meta.insert(ACTIVE_KEY_ID, info.key_id.as_str())?;
        }
        write_txn.commit()?;
        opened.keys.rotate(key)?;

        tracing::info!(
            key_id = %info.key_id,
            rotated_from = %previous.id(),
            "Sealing key rotated"
        );
        Ok(info)
    }

    /// Re-seal every chunk not sealed under the active key. Versions are
    /// kept. Returns the number of record versions rewritten.
    pub fn reseal_all(&self) -> StorageResult<usize> {
        let opened = self.opened()?;
        let writer = self.lock_writer()?;
        if writer.is_some() {
            return Err(StorageError::TransactionAlreadyActive);
        }

        let active = opened.keys.active()?;
        let write_txn = opened.db.begin_write()?;
        let resealed = match self.reseal_in(&write_txn, opened, &active) {
            Ok(count) => count,
            Err(e) => {
                if let Err(abort_err) = write_txn.abort() {
                    tracing::error!(error = %abort_err, "Failed to abort reseal");
                }
                return Err(e);
            }
        };
        write_txn.commit()?;
        drop(writer);

        tracing::info!(resealed, key_id = %active.id(), "Reseal finished");
        Ok(resealed)
    }

    fn reseal_in(
        &self,
        write_txn: &WriteTransaction,
        opened: &Opened,
        active: &SealingKey,
    ) -> StorageResult<usize> {
        let mut manifests = write_txn.open_table(MANIFESTS)?;
        let mut history = write_txn.open_table(MANIFEST_HISTORY)?;
        let mut chunks = write_txn.open_table(CHUNKS)?;

        let stale = |manifest: &RecordManifest| {
            manifest.encrypted && manifest.key_id.as_deref() != Some(active.id())
        };

        let mut current = Vec::new();
        for entry in manifests.iter()? {
            let (_, value) = entry?;
            let manifest: RecordManifest = serde_json::from_slice(value.value())?;
            if stale(&manifest) {
                current.push(manifest);
            }
        }
        let mut retained = Vec::new();
        for entry in history.iter()? {
            let (key, value) = entry?;
            let manifest: RecordManifest = serde_json::from_slice(value.value())?;
            if stale(&manifest) {
                retained.push((key.value().to_vec(), manifest));
            }
        }

        let mut count = 0;
        for mut manifest in current {
            reseal_chunks(&mut chunks, opened, &manifest, active)?;
            manifest.key_id = Some(active.id().to_string());
            manifest.updated_at = Utc::now();
            let json = serde_json::to_vec(&manifest)?;
            manifests.insert(manifest.key.as_str(), json.as_slice())?;
            count += 1;
        }
        for (history_key, mut manifest) in retained {
            reseal_chunks(&mut chunks, opened, &manifest, active)?;
            manifest.key_id = Some(active.id().to_string());
            let json = serde_json::to_vec(&manifest)?;
            history.insert(history_key.as_slice(), json.as_slice())?;
            count += 1;
        }
        Ok(count)
    }

    /// Read-only probe of the database and the key ring.
    pub fn health_check(&self) -> StorageResult<()> {
        let opened = self.opened()?;
        let read_txn = opened.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        let active_id = meta
            .get(ACTIVE_KEY_ID)?
            .map(|v| v.value().to_string())
            .ok_or_else(|| StorageError::Unavailable("no active sealing key".to_string()))?;
        opened.keys.get(&active_id)?;
        Ok(())
    }

    pub fn active_key_id(&self) -> StorageResult<String> {
        Ok(self.opened()?.keys.active()?.id().to_string())
    }

    // =========================================================================
    // Test hooks
    // =========================================================================

    /// Fail the next commit just before applying operation `position`,
    /// after earlier operations were written inside the redb transaction.
    #[cfg(test)]
    pub(crate) fn inject_commit_fault(&self, position: usize) {
        if let Ok(mut fault) = self.commit_fault.lock() {
            *fault = Some(position);
        }
    }

    #[cfg(test)]
    fn trip_commit_fault(&self, position: usize) -> StorageResult<()> {
        let mut fault = self
            .commit_fault
            .lock()
            .map_err(|_| StorageError::Unavailable("fault lock poisoned".to_string()))?;
        if *fault == Some(position) {
            *fault = None;
            return Err(StorageError::Io(std::io::Error::other("injected commit fault")));
        }
        Ok(())
    }

    /// XOR one byte of a stored chunk, bypassing sealing.
    #[cfg(test)]
    pub(crate) fn tamper_chunk(&self, key: &str, index: u32, offset: usize, mask: u8) {
        let opened = self.opened().unwrap();
        let version = self.metadata(key).unwrap().version;
        let chunk_id = chunk_key(key, version, index);
        let write_txn = opened.db.begin_write().unwrap();
        {
            let mut chunks = write_txn.open_table(CHUNKS).unwrap();
            let mut raw = chunks
                .get(chunk_id.as_slice())
                .unwrap()
                .unwrap()
                .value()
                .to_vec();
            raw[offset] ^= mask;
            chunks.insert(chunk_id.as_slice(), raw.as_slice()).unwrap();
        }
        write_txn.commit().unwrap();
    }

    /// Overwrite a manifest, bypassing validation.
    #[cfg(test)]
    pub(crate) fn overwrite_manifest(&self, manifest: &RecordManifest) {
        let opened = self.opened().unwrap();
        let write_txn = opened.db.begin_write().unwrap();
        {
            let mut manifests = write_txn.open_table(MANIFESTS).unwrap();
            let json = serde_json::to_vec(manifest).unwrap();
            manifests
                .insert(manifest.key.as_str(), json.as_slice())
                .unwrap();
        }
        write_txn.commit().unwrap();
    }
}

// =============================================================================
// Write helpers
// =============================================================================

/// One record write inside an open redb transaction.
struct RecordWrite<'a> {
    options: &'a StoreOptions,
    chunk_size: usize,
    active: &'a SealingKey,
}

impl RecordWrite<'_> {
    fn apply(
        &self,
        manifests: &mut ManifestTable<'_>,
        chunks: &mut ChunkTable<'_>,
        history: &mut ChunkTable<'_>,
        key: &str,
        data: &[u8],
    ) -> StorageResult<()> {
        let now = Utc::now();
        let previous = load_manifest(&*manifests, key)?;
        if self.options.create_only && previous.is_some() {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        let version = match &previous {
            Some(prev) => prev.version.checked_add(1).ok_or_else(|| {
                StorageError::InvalidArgument(format!("{key}: version counter exhausted"))
            })?,
            None => 1,
        };

        let compressed_buf = if self.options.compress {
            compress_if_smaller(data).map(Zeroizing::new)
        } else {
            None
        };
        let compressed = compressed_buf.is_some();
        let stored: &[u8] = match &compressed_buf {
            Some(buf) => buf.as_slice(),
            None => data,
        };

        let pieces: Vec<&[u8]> = if stored.is_empty() {
            vec![stored]
        } else {
            stored.chunks(self.chunk_size).collect()
        };
        let chunk_count = u32::try_from(pieces.len())
            .map_err(|_| StorageError::InvalidArgument(format!("{key}: too many chunks")))?;
        let plaintext_length = data.len() as u64;

        let mut entries = Vec::with_capacity(pieces.len());
        for (index, piece) in (0u32..).zip(pieces) {
            let (bytes, digest) = if self.options.encrypt {
                let aad = chunk_aad(key, version, index, chunk_count, compressed, plaintext_length);
                (self.active.seal(piece, &aad)?.to_bytes(), None)
            } else {
                (piece.to_vec(), Some(sha256_hex(piece)))
            };
            chunks.insert(chunk_key(key, version, index).as_slice(), bytes.as_slice())?;
            entries.push(ChunkEntry {
                index,
                length: bytes.len() as u64,
                digest,
            });
        }

        let manifest = RecordManifest {
            key: key.to_string(),
            version,
            plaintext_length,
            stored_length: stored.len() as u64,
            chunk_size: self.chunk_size as u64,
            chunk_count,
            chunks: entries,
            compressed,
            encrypted: self.options.encrypt,
            key_id: self
                .options
                .encrypt
                .then(|| self.active.id().to_string()),
            content_hash: Some(sha256_hex(data)),
            created_at: previous.as_ref().map_or(now, |prev| prev.created_at),
            updated_at: now,
        };
        let json = serde_json::to_vec(&manifest)?;
        manifests.insert(key, json.as_slice())?;

        if let Some(prev) = previous {
            if self.options.keep_versions {
                let json = serde_json::to_vec(&prev)?;
                history.insert(history_key(key, prev.version).as_slice(), json.as_slice())?;
            } else {
                let (start, end) = version_chunk_range(key, prev.version);
                remove_range(chunks, &start, &end)?;
            }
        }
        Ok(())
    }
}

fn stage_put(key: &str, data: &[u8], options: &StoreOptions) -> StorageResult<StagedOp> {
    validate_record_key(key, options.allow_empty)?;
    if data.is_empty() && !options.allow_empty {
        return Err(StorageError::InvalidArgument(
            "payload must not be empty".to_string(),
        ));
    }
    if data.len() > MAX_RECORD_SIZE {
        return Err(StorageError::TooLarge {
            size: data.len(),
            limit: MAX_RECORD_SIZE,
        });
    }
    Ok(StagedOp::Put {
        key: key.to_string(),
        data: Zeroizing::new(data.to_vec()),
        options: options.clone(),
    })
}

fn open_slot<'w>(
    writer: &'w mut MutexGuard<'_, Option<OpenTransaction>>,
    handle: &TransactionHandle,
) -> StorageResult<&'w mut OpenTransaction> {
    match writer.as_mut() {
        Some(txn) if txn.id == handle.id() => Ok(txn),
        _ => Err(StorageError::InvalidTransaction(handle.id().to_string())),
    }
}

fn open_database(path: &Path) -> StorageResult<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::Unavailable(e.to_string()))?;
    }
    Ok(Database::create(path)?)
}

fn load_manifest(
    manifests: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StorageResult<Option<RecordManifest>> {
    match manifests.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn remove_range(table: &mut ChunkTable<'_>, start: &[u8], end: &[u8]) -> StorageResult<()> {
    let doomed = table
        .range(start..end)?
        .map(|entry| entry.map(|(key, _)| key.value().to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    for key in doomed {
        table.remove(key.as_slice())?;
    }
    Ok(())
}

fn reseal_chunks(
    chunks: &mut ChunkTable<'_>,
    opened: &Opened,
    manifest: &RecordManifest,
    active: &SealingKey,
) -> StorageResult<()> {
    let key_id = manifest
        .key_id
        .as_deref()
        .ok_or_else(|| StorageError::CorruptManifest(format!("{}: no key id", manifest.key)))?;
    let old_key = opened.keys.get(key_id)?;

    for entry in &manifest.chunks {
        let chunk_id = chunk_key(&manifest.key, manifest.version, entry.index);
        let raw = chunks
            .get(chunk_id.as_slice())?
            .map(|v| v.value().to_vec())
            .ok_or_else(|| {
                StorageError::CorruptManifest(format!(
                    "{}: chunk {} missing",
                    manifest.key, entry.index
                ))
            })?;
        let aad = chunk_aad(
            &manifest.key,
            manifest.version,
            entry.index,
            manifest.chunk_count,
            manifest.compressed,
            manifest.plaintext_length,
        );
        let plain = Zeroizing::new(old_key.unseal(&SealedBox::from_bytes(&raw)?, &aad)?);
        let resealed = active.seal(&plain, &aad)?.to_bytes();
        chunks.insert(chunk_id.as_slice(), resealed.as_slice())?;
    }
    Ok(())
}

// =============================================================================
// Key listing
// =============================================================================

/// Lazy, finite key enumeration. Pages through the manifest table with a
/// fresh read snapshot per page.
pub struct KeyIter<'a> {
    store: &'a SealedStore,
    prefix: String,
    cursor: Option<String>,
    page: VecDeque<String>,
    done: bool,
}

impl Iterator for KeyIter<'_> {
    type Item = StorageResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.done {
            match self.store.list_page(&self.prefix, self.cursor.as_deref()) {
                Ok((page, exhausted)) => {
                    self.done = exhausted;
                    self.cursor = page.last().cloned().or(self.cursor.take());
                    self.page.extend(page);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.page.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::MIN_ITERATIONS;
    use crate::crypto::{NONCE_LEN, TAG_LEN};
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    const MASTER: [u8; 32] = [7u8; 32];

    fn settings(chunk_size_bytes: usize) -> StoreSettings {
        StoreSettings {
            kdf_iterations: MIN_ITERATIONS,
            chunk_size_bytes,
            retry: RetryPolicy::immediate(1),
        }
    }

    fn open_at(root: &Path, chunk_size_bytes: usize) -> SealedStore {
        let mut store = SealedStore::new(
            StoragePaths::new(root),
            Zeroizing::new(MASTER.to_vec()),
            settings(chunk_size_bytes),
        );
        store.initialize().unwrap();
        store
    }

    fn setup() -> (TempDir, SealedStore) {
        let temp = TempDir::new().unwrap();
        let store = open_at(temp.path(), 16);
        (temp, store)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn initialize_is_idempotent() {
        let (_temp, mut store) = setup();
        let key_id = store.active_key_id().unwrap();
        assert!(store.initialize().unwrap());
        assert_eq!(store.active_key_id().unwrap(), key_id);
    }

    #[test]
    fn uninitialized_store_is_rejected() {
        let store = SealedStore::new(
            StoragePaths::new("/tmp/never-opened"),
            Zeroizing::new(MASTER.to_vec()),
            settings(16),
        );
        assert!(matches!(
            store.retrieve("k"),
            Err(StorageError::NotInitialized)
        ));
    }

    #[test]
    fn round_trip_across_option_combinations() {
        let (_temp, store) = setup();
        let payloads = [sample(5), sample(16), sample(100), vec![b'a'; 300]];

        for (i, data) in payloads.iter().enumerate() {
            for encrypt in [true, false] {
                for compress in [true, false] {
                    let key = format!("rec-{i}-{encrypt}-{compress}");
                    let options = StoreOptions {
                        encrypt,
                        compress,
                        ..StoreOptions::default()
                    };
                    store.store(&key, data, &options).unwrap();
                    assert_eq!(&store.retrieve(&key).unwrap(), data, "{key}");
                }
            }
        }
    }

    #[test]
    fn large_payload_is_chunked_and_ordered() {
        let (_temp, store) = setup();
        let data = sample(16 * 5 + 3);
        store.store("big", &data, &StoreOptions::default()).unwrap();

        let manifest = store.metadata("big").unwrap();
        assert_eq!(manifest.chunk_count, 6);
        assert_eq!(manifest.plaintext_length, data.len() as u64);
        assert!(manifest.encrypted);
        assert_eq!(manifest.content_hash, Some(sha256_hex(&data)));
        assert_eq!(store.retrieve("big").unwrap(), data);
    }

    #[test]
    fn sealed_record_is_checked_against_content_hash() {
        let (_temp, store) = setup();
        store.store("k", &sample(40), &StoreOptions::default()).unwrap();

        let mut manifest = store.metadata("k").unwrap();
        manifest.content_hash = Some(sha256_hex(b"something else"));
        store.overwrite_manifest(&manifest);
        assert_eq!(
            store.retrieve("k").unwrap_err().kind(),
            ErrorKind::IntegrityViolation
        );
    }

    #[test]
    fn compression_flag_reflects_effective_choice() {
        let (_temp, store) = setup();
        store
            .store("zeros", &[0u8; 4096], &StoreOptions::compressed())
            .unwrap();
        assert!(store.metadata("zeros").unwrap().compressed);

        let noise = crate::crypto::random_bytes(64).unwrap();
        store
            .store("noise", &noise, &StoreOptions::compressed())
            .unwrap();
        assert!(!store.metadata("noise").unwrap().compressed);
        assert_eq!(store.retrieve("noise").unwrap(), noise);
    }

    #[test]
    fn bit_flips_are_integrity_violations() {
        let (_temp, store) = setup();
        store.store("k", b"attack at dawn", &StoreOptions::default()).unwrap();

        // nonce, tag and ciphertext regions
        for offset in [0, NONCE_LEN, NONCE_LEN + TAG_LEN + 3] {
            store.tamper_chunk("k", 0, offset, 0x01);
            let err = store.retrieve("k").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IntegrityViolation, "offset {offset}");
            store.tamper_chunk("k", 0, offset, 0x01);
            assert_eq!(store.retrieve("k").unwrap(), b"attack at dawn");
        }
    }

    #[test]
    fn unencrypted_tampering_is_detected_by_digest() {
        let (_temp, store) = setup();
        let options = StoreOptions {
            encrypt: false,
            ..StoreOptions::default()
        };
        store.store("plain", b"public data", &options).unwrap();
        store.tamper_chunk("plain", 0, 2, 0x80);
        assert_eq!(
            store.retrieve("plain").unwrap_err().kind(),
            ErrorKind::IntegrityViolation
        );
    }

    #[test]
    fn swapped_chunk_order_is_detected() {
        let (_temp, store) = setup();
        store.store("multi", &sample(40), &StoreOptions::default()).unwrap();

        let mut manifest = store.metadata("multi").unwrap();
        manifest.chunks.swap(0, 1);
        store.overwrite_manifest(&manifest);
        assert_eq!(
            store.retrieve("multi").unwrap_err().kind(),
            ErrorKind::CorruptManifest
        );

        manifest.chunks.swap(0, 1);
        manifest.chunk_count = 2;
        store.overwrite_manifest(&manifest);
        assert_eq!(
            store.retrieve("multi").unwrap_err().kind(),
            ErrorKind::CorruptManifest
        );
    }

    #[test]
    fn missing_and_corrupt_are_distinguished() {
        let (_temp, store) = setup();
        assert_eq!(store.retrieve("absent").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.delete("absent").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_key_and_payload_need_explicit_permission() {
        let (_temp, store) = setup();
        let defaults = StoreOptions::default();
        assert!(matches!(
            store.store("", b"x", &defaults),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.store("k", b"", &defaults),
            Err(StorageError::InvalidArgument(_))
        ));

        let permissive = StoreOptions {
            allow_empty: true,
            ..StoreOptions::default()
        };
        store.store("empty", b"", &permissive).unwrap();
        assert!(store.retrieve("empty").unwrap().is_empty());
        assert_eq!(store.metadata("empty").unwrap().chunk_count, 1);
    }

    #[test]
    fn zero_chunk_size_falls_back_to_default() {
        let temp = TempDir::new().unwrap();
        let store = open_at(temp.path(), 0);
        store.store("k", &sample(4096), &StoreOptions::default()).unwrap();

        let manifest = store.metadata("k").unwrap();
        assert_eq!(manifest.chunk_size, DEFAULT_CHUNK_SIZE as u64);
        assert_eq!(manifest.chunk_count, 1);
    }

    #[test]
    fn versions_increment_and_can_be_retained() {
        let (_temp, store) = setup();
        let keep = StoreOptions {
            keep_versions: true,
            ..StoreOptions::default()
        };
        store.store("doc", b"v1", &keep).unwrap();
        let created = store.metadata("doc").unwrap().created_at;
        store.store("doc", b"v2", &keep).unwrap();
        store.store("doc", b"v3", &StoreOptions::default()).unwrap();

        let manifest = store.metadata("doc").unwrap();
        assert_eq!(manifest.version, 3);
        assert_eq!(manifest.created_at, created);
        assert_eq!(store.retrieve("doc").unwrap(), b"v3");
        assert_eq!(store.retrieve_version("doc", 1).unwrap(), b"v1");
        assert_eq!(store.retrieve_version("doc", 3).unwrap(), b"v3");
        // v2 was replaced without keep_versions
        assert!(matches!(
            store.retrieve_version("doc", 2),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn create_only_refuses_overwrite() {
        let (_temp, store) = setup();
        store.store("once", b"first", &StoreOptions::create_only()).unwrap();
        assert!(matches!(
            store.store("once", b"second", &StoreOptions::create_only()),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(store.retrieve("once").unwrap(), b"first");
    }

    #[test]
    fn transaction_is_invisible_until_commit() {
        let (_temp, store) = setup();
        let txn = store.begin_transaction().unwrap();
        store.put(&txn, "a", b"alpha", &StoreOptions::default()).unwrap();
        assert!(!store.exists("a").unwrap());

        let id = txn.id();
        assert_eq!(store.transaction_state(id), Some(TransactionState::Open));
        store.commit(txn).unwrap();
        assert_eq!(store.transaction_state(id), Some(TransactionState::Committed));
        assert_eq!(store.retrieve("a").unwrap(), b"alpha");
    }

    #[test]
    fn single_writer_is_enforced() {
        let (_temp, store) = setup();
        let first = store.begin_transaction().unwrap();
        store.put(&first, "a", b"alpha", &StoreOptions::default()).unwrap();

        assert!(matches!(
            store.begin_transaction(),
            Err(StorageError::TransactionAlreadyActive)
        ));
        assert!(matches!(
            store.store("b", b"beta", &StoreOptions::default()),
            Err(StorageError::TransactionAlreadyActive)
        ));

        store.put(&first, "c", b"gamma", &StoreOptions::default()).unwrap();
        store.commit(first).unwrap();
        assert_eq!(store.retrieve("a").unwrap(), b"alpha");
        assert_eq!(store.retrieve("c").unwrap(), b"gamma");
        assert!(!store.exists("b").unwrap());
    }

    #[test]
    fn rollback_discards_everything() {
        let (_temp, store) = setup();
        let txn = store.begin_transaction().unwrap();
        store.put(&txn, "a", b"alpha", &StoreOptions::default()).unwrap();
        let id = txn.id();
        assert!(store.rollback(txn).unwrap());
        assert!(!store.exists("a").unwrap());
        assert_eq!(store.transaction_state(id), Some(TransactionState::RolledBack));

        // the slot is free again
        let again = store.begin_transaction().unwrap();
        store.rollback(again).unwrap();
    }

    #[test]
    fn delete_of_missing_key_rejects_whole_commit() {
        let (_temp, store) = setup();
        let txn = store.begin_transaction().unwrap();
        store.put(&txn, "a", b"alpha", &StoreOptions::default()).unwrap();
        store.put(&txn, "b", b"beta", &StoreOptions::default()).unwrap();
        store.delete_in(&txn, "c").unwrap();

        let err = store.commit(txn).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitFailed);
        assert!(!store.exists("a").unwrap());
        assert!(!store.exists("b").unwrap());
    }

    #[test]
    fn mid_commit_fault_leaves_previous_state_after_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = open_at(temp.path(), 16);
            store.store("a", b"original", &StoreOptions::default()).unwrap();

            let txn = store.begin_transaction().unwrap();
            store.put(&txn, "a", b"updated", &StoreOptions::default()).unwrap();
            store.put(&txn, "b", b"new", &StoreOptions::default()).unwrap();
            store.inject_commit_fault(1);
            assert!(matches!(store.commit(txn), Err(StorageError::CommitFailed(_))));
        }

        let reopened = open_at(temp.path(), 16);
        assert_eq!(reopened.retrieve("a").unwrap(), b"original");
        assert_eq!(reopened.metadata("a").unwrap().version, 1);
        assert!(!reopened.exists("b").unwrap());
        assert!(reopened.validate_integrity().unwrap().is_clean());
    }

    #[test]
    fn list_keys_is_lazy_prefixed_and_restartable() {
        let (_temp, store) = setup();
        for i in 0..150 {
            store
                .store(&format!("fn:{i:03}"), b"x", &StoreOptions::default())
                .unwrap();
        }
        store.store("secret:s", b"x", &StoreOptions::default()).unwrap();

        let keys: Vec<String> = store
            .list_keys(Some("fn:"))
            .collect::<StorageResult<_>>()
            .unwrap();
        assert_eq!(keys.len(), 150);
        assert_eq!(keys.first().map(String::as_str), Some("fn:000"));
        assert_eq!(keys.last().map(String::as_str), Some("fn:149"));

        store.delete("fn:000").unwrap();
        assert_eq!(store.list_keys(Some("fn:")).count(), 149);
        assert_eq!(store.list_keys(None).count(), 150);
    }

    #[test]
    fn rotation_keeps_old_records_readable_and_reseal_migrates() {
        let temp = TempDir::new().unwrap();
        let store = open_at(temp.path(), 16);
        store.store("old", &sample(50), &StoreOptions::default()).unwrap();
        let first_key = store.active_key_id().unwrap();

        let info = store.rotate_key().unwrap();
        assert_eq!(info.rotated_from.as_deref(), Some(first_key.as_str()));
        assert_eq!(store.retrieve("old").unwrap(), sample(50));

        store.store("new", b"fresh", &StoreOptions::default()).unwrap();
        assert_eq!(store.metadata("new").unwrap().key_id, Some(info.key_id.clone()));

        assert_eq!(store.reseal_all().unwrap(), 1);
        let manifest = store.metadata("old").unwrap();
        assert_eq!(manifest.key_id, Some(info.key_id.clone()));
        assert_eq!(manifest.version, 1);
        drop(store);

        let reopened = open_at(temp.path(), 16);
        assert_eq!(reopened.active_key_id().unwrap(), info.key_id);
        assert_eq!(reopened.retrieve("old").unwrap(), sample(50));
    }

    #[test]
    fn wrong_master_secret_cannot_open_store() {
        let temp = TempDir::new().unwrap();
        drop(open_at(temp.path(), 16));

        let mut store = SealedStore::new(
            StoragePaths::new(temp.path()),
            Zeroizing::new(vec![9u8; 32]),
            settings(16),
        );
        assert_eq!(
            store.initialize().unwrap_err().kind(),
            ErrorKind::IntegrityViolation
        );
    }

    #[test]
    fn integrity_scan_reports_corrupt_keys() {
        let (_temp, store) = setup();
        store.store("good", b"fine", &StoreOptions::default()).unwrap();
        store.store("bad", b"soon broken", &StoreOptions::default()).unwrap();
        store.tamper_chunk("bad", 0, NONCE_LEN + TAG_LEN, 0x10);

        let report = store.validate_integrity().unwrap();
        assert_eq!(report.total_keys, 2);
        assert_eq!(report.corrupt_keys, vec!["bad".to_string()]);
    }

    #[test]
    fn usage_stats_account_for_compression() {
        let (_temp, store) = setup();
        store
            .store("zeros", &[0u8; 2048], &StoreOptions::compressed())
            .unwrap();
        let stats = store.usage_stats().unwrap();
        assert_eq!(stats.total_keys, 1);
        assert_eq!(stats.total_plaintext_bytes, 2048);
        assert!(stats.compression_ratio < 1.0);
        store.health_check().unwrap();
    }

    #[test]
    fn oversized_record_is_rejected_before_writing() {
        let err = stage_put("k", &vec![0u8; MAX_RECORD_SIZE + 1], &StoreOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ResourceLimitExceeded);
    }
}
