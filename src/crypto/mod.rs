// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cryptographic Primitives
//!
//! Everything the boundary needs for sealing and signing, built on `ring`
//! (PBKDF2, AES-256-GCM, CSPRNG) and `k256` (ECDSA secp256k1).
//!
//! ## Key Handling
//!
//! - Key material lives in [`KeyMaterial`], which zeroizes on drop.
//! - Sealing keys are re-derived from the platform master secret and a
//!   persisted salt; the derived material is never written anywhere.
//! - The active sealing key is swapped atomically on rotation; previous
//!   keys stay available for unsealing.

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod random;
pub mod signing;

use sha2::{Digest, Sha256};

use crate::error::{EnclaveError, ErrorKind};

pub use aead::{seal, seal_with_aad, unseal, unseal_with_aad, SealedBox, NONCE_LEN, TAG_LEN};
pub use kdf::derive_key;
pub use keys::{KeyMaterial, KeyRing, SealingKey, SealingKeyInfo, KEY_LEN, SEALING_ALGORITHM};
pub use random::{random_bytes, random_f64, secure_random};
pub use signing::{verify, SigningKeyPair};

/// Errors produced by the primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("weak parameters: {0}")]
    WeakParameters(String),

    #[error("authentication tag mismatch")]
    IntegrityViolation,

    #[error("min {min} exceeds max {max}")]
    Range { min: i64, max: i64 },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unknown sealing key {0}")]
    UnknownKey(String),

    #[error("secure random source unavailable")]
    RandomUnavailable,

    #[error("crypto failure: {0}")]
    Failure(String),
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::WeakParameters(_) => ErrorKind::WeakParameters,
            CryptoError::IntegrityViolation | CryptoError::UnknownKey(_) => {
                ErrorKind::IntegrityViolation
            }
            CryptoError::Range { .. } => ErrorKind::RangeError,
            CryptoError::InvalidKey(_) => ErrorKind::InvalidArgument,
            CryptoError::RandomUnavailable | CryptoError::Failure(_) => ErrorKind::Internal,
        }
    }
}

impl From<CryptoError> for EnclaveError {
    fn from(err: CryptoError) -> Self {
        EnclaveError::new(err.kind(), err.to_string())
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Raw SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn error_kinds_map_to_taxonomy() {
        assert_eq!(
            CryptoError::WeakParameters("salt".into()).kind(),
            ErrorKind::WeakParameters
        );
        assert_eq!(CryptoError::IntegrityViolation.kind(), ErrorKind::IntegrityViolation);
        assert_eq!(CryptoError::Range { min: 2, max: 1 }.kind(), ErrorKind::RangeError);
    }
}
