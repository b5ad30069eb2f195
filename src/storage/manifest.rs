// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record manifests and chunk addressing.
//!
//! Each logical key has exactly one manifest. Chunks live in a separate
//! table under binary keys that sort by (record key, version, index), so a
//! record's chunks are one contiguous range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StorageError, StorageResult, MAX_KEY_LEN};

/// Separator between the record key and the version/index suffix.
const CHUNK_KEY_SEPARATOR: u8 = 0x00;

/// One chunk as listed in its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub index: u32,
    /// Stored (sealed or plain) length in bytes.
    pub length: u64,
    /// SHA-256 of the stored bytes. Only present for unencrypted records,
    /// where there is no authentication tag to rely on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Metadata for one stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordManifest {
    pub key: String,
    pub version: u32,
    pub plaintext_length: u64,
    /// Length after compression, before sealing.
    pub stored_length: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub chunks: Vec<ChunkEntry>,
    pub compressed: bool,
    pub encrypted: bool,
    /// Sealing key used for every chunk of this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// SHA-256 of the plaintext, compared after reassembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordManifest {
    /// Structural checks run before any chunk is read.
    pub fn validate(&self, expected_key: &str) -> StorageResult<()> {
        let corrupt = |reason: &str| {
            Err(StorageError::CorruptManifest(format!(
                "{expected_key}: {reason}"
            )))
        };

        if self.key != expected_key {
            return corrupt("manifest key mismatch");
        }
        if self.chunk_count == 0 || self.chunk_count as usize != self.chunks.len() {
            return corrupt("chunk count does not match chunk list");
        }
        if self
            .chunks
            .iter()
            .enumerate()
            .any(|(position, chunk)| chunk.index as usize != position)
        {
            return corrupt("chunk order is not contiguous");
        }
        if self.encrypted && self.key_id.is_none() {
            return corrupt("encrypted record has no sealing key id");
        }
        if !self.encrypted {
            if self.chunks.iter().any(|chunk| chunk.digest.is_none()) {
                return corrupt("unencrypted chunk has no digest");
            }
            let total: u64 = self.chunks.iter().map(|chunk| chunk.length).sum();
            if total != self.stored_length {
                return corrupt("chunk lengths do not add up to stored length");
            }
        }
        if !self.compressed && self.stored_length != self.plaintext_length {
            return corrupt("uncompressed record length mismatch");
        }
        Ok(())
    }
}

/// Check a record key for use as a storage key. The empty key is only
/// accepted when the caller explicitly allows it.
pub fn validate_record_key(key: &str, allow_empty: bool) -> StorageResult<()> {
    if key.is_empty() && !allow_empty {
        return Err(StorageError::InvalidArgument("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidArgument(format!(
            "key longer than {MAX_KEY_LEN} bytes"
        )));
    }
    if key.as_bytes().contains(&CHUNK_KEY_SEPARATOR) {
        return Err(StorageError::InvalidArgument(
            "key must not contain NUL".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// Chunk Keys
// =============================================================================

/// `key ‖ 0x00 ‖ version_be ‖ index_be`
pub fn chunk_key(key: &str, version: u32, index: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 9);
    out.extend_from_slice(key.as_bytes());
    out.push(CHUNK_KEY_SEPARATOR);
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&index.to_be_bytes());
    out
}

/// Range covering every chunk of one record version.
pub fn version_chunk_range(key: &str, version: u32) -> (Vec<u8>, Vec<u8>) {
    let start = chunk_key(key, version, 0);
    let mut end = Vec::with_capacity(key.len() + 6);
    end.extend_from_slice(key.as_bytes());
    end.push(CHUNK_KEY_SEPARATOR);
    match version.checked_add(1) {
        Some(next) => end.extend_from_slice(&next.to_be_bytes()),
        None => end.extend_from_slice(&[0xFF; 5]),
    }
    (start, end)
}

/// Range covering every chunk and history entry of a record, all versions.
pub fn record_range(key: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(key.len() + 1);
    start.extend_from_slice(key.as_bytes());
    let mut end = start.clone();
    start.push(CHUNK_KEY_SEPARATOR);
    end.push(CHUNK_KEY_SEPARATOR + 1);
    (start, end)
}

/// `key ‖ 0x00 ‖ version_be`, the history table key.
pub fn history_key(key: &str, version: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 5);
    out.extend_from_slice(key.as_bytes());
    out.push(CHUNK_KEY_SEPARATOR);
    out.extend_from_slice(&version.to_be_bytes());
    out
}

/// Associated data sealed with every chunk. Binds the chunk to its
/// position in one specific record version.
pub fn chunk_aad(
    key: &str,
    version: u32,
    index: u32,
    chunk_count: u32,
    compressed: bool,
    plaintext_length: u64,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(key.len() + 26);
    aad.extend_from_slice(&(key.len() as u32).to_be_bytes());
    aad.extend_from_slice(key.as_bytes());
    aad.extend_from_slice(&version.to_be_bytes());
    aad.extend_from_slice(&index.to_be_bytes());
    aad.extend_from_slice(&chunk_count.to_be_bytes());
    aad.push(u8::from(compressed));
    aad.extend_from_slice(&plaintext_length.to_be_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(chunks: Vec<ChunkEntry>) -> RecordManifest {
        let stored: u64 = chunks.iter().map(|c| c.length).sum();
        RecordManifest {
            key: "k".to_string(),
            version: 1,
            plaintext_length: stored,
            stored_length: stored,
            chunk_size: 4,
            chunk_count: chunks.len() as u32,
            chunks,
            compressed: false,
            encrypted: false,
            key_id: None,
            content_hash: Some("00".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn entry(index: u32, length: u64) -> ChunkEntry {
        ChunkEntry {
            index,
            length,
            digest: Some("d".to_string()),
        }
    }

    #[test]
    fn chunk_keys_sort_by_version_then_index() {
        let a = chunk_key("rec", 1, 9);
        let b = chunk_key("rec", 2, 0);
        let c = chunk_key("rec", 2, 1);
        assert!(a < b && b < c);

        let (start, end) = version_chunk_range("rec", 2);
        assert!(start <= b && b < end);
        assert!(c < end);
        assert!(a < start);

        let (all_start, all_end) = record_range("rec");
        assert!(all_start <= a && c < all_end);
        assert!(history_key("rec", 7) < all_end);
    }

    #[test]
    fn prefix_keys_do_not_collide() {
        let (_, end) = version_chunk_range("ab", 1);
        let other = chunk_key("ab\u{1}", 1, 0);
        assert!(other > end);
    }

    #[test]
    fn aad_differs_per_position() {
        let base = chunk_aad("k", 1, 0, 2, false, 10);
        assert_ne!(base, chunk_aad("k", 1, 1, 2, false, 10));
        assert_ne!(base, chunk_aad("k", 2, 0, 2, false, 10));
        assert_ne!(base, chunk_aad("k", 1, 0, 3, false, 10));
        assert_ne!(base, chunk_aad("k", 1, 0, 2, true, 10));
        assert_ne!(base, chunk_aad("k", 1, 0, 2, false, 11));
    }

    #[test]
    fn valid_manifest_passes() {
        manifest(vec![entry(0, 4), entry(1, 2)]).validate("k").unwrap();
    }

    #[test]
    fn inconsistent_manifests_are_corrupt() {
        let mut m = manifest(vec![entry(0, 4), entry(1, 2)]);
        m.chunk_count = 3;
        assert!(matches!(m.validate("k"), Err(StorageError::CorruptManifest(_))));

        let m = manifest(vec![entry(1, 4), entry(0, 2)]);
        assert!(matches!(m.validate("k"), Err(StorageError::CorruptManifest(_))));

        let mut m = manifest(vec![entry(0, 4)]);
        m.stored_length = 9;
        assert!(matches!(m.validate("k"), Err(StorageError::CorruptManifest(_))));

        let m = manifest(vec![entry(0, 4)]);
        assert!(matches!(m.validate("other"), Err(StorageError::CorruptManifest(_))));

        let mut m = manifest(vec![entry(0, 4)]);
        m.encrypted = true;
        assert!(matches!(m.validate("k"), Err(StorageError::CorruptManifest(_))));
    }

    #[test]
    fn record_keys_are_checked() {
        assert!(validate_record_key("fn:double", false).is_ok());
        assert!(validate_record_key("", false).is_err());
        assert!(validate_record_key("", true).is_ok());
        assert!(validate_record_key("a\0b", true).is_err());
        assert!(validate_record_key(&"x".repeat(MAX_KEY_LEN + 1), true).is_err());
    }
}
