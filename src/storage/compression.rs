// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LZ4 compression applied to record payloads before sealing.

use super::{StorageError, StorageResult, MAX_RECORD_SIZE};

/// Compress `data`, returning `None` when compression does not shrink it.
pub fn compress_if_smaller(data: &[u8]) -> Option<Vec<u8>> {
    let compressed = lz4_flex::compress_prepend_size(data);
    (compressed.len() < data.len()).then_some(compressed)
}

/// Decompress a size-prepended LZ4 buffer that must expand to exactly
/// `expected_len` bytes.
pub fn decompress(data: &[u8], expected_len: usize) -> StorageResult<Vec<u8>> {
    if data.len() < 4 {
        return Err(StorageError::IntegrityViolation(
            "compressed payload is truncated".to_string(),
        ));
    }
    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if declared != expected_len || declared > MAX_RECORD_SIZE {
        return Err(StorageError::CorruptManifest(format!(
            "compressed payload declares {declared} bytes, manifest expects {expected_len}"
        )));
    }
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| StorageError::IntegrityViolation(format!("decompression failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetitive_data_compresses() {
        let data = vec![b'a'; 64 * 1024];
        let compressed = compress_if_smaller(&data).expect("should compress");
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn incompressible_data_is_left_alone() {
        let data = crate::crypto::random_bytes(256).unwrap();
        assert!(compress_if_smaller(&data).is_none());
    }

    #[test]
    fn length_mismatch_is_corrupt_manifest() {
        let data = vec![b'z'; 4096];
        let compressed = compress_if_smaller(&data).unwrap();
        assert!(matches!(
            decompress(&compressed, 100),
            Err(StorageError::CorruptManifest(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let mut bogus = 16u32.to_le_bytes().to_vec();
        bogus.extend_from_slice(&[0xFF; 3]);
        assert!(decompress(&bogus, 16).is_err());
        assert!(decompress(&[1, 2], 16).is_err());
    }
}
