// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sealing keys and the key ring used by sealed storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::aead::{seal_with_aad, unseal_with_aad, SealedBox};
use super::kdf::derive_key;
use super::random::fill_random;
use super::{CryptoError, CryptoResult};

pub const KEY_LEN: usize = 32;
pub const SEALING_ALGORITHM: &str = "AES-256-GCM";

/// Salt length used for new sealing keys.
pub const SALT_LEN: usize = 32;

// =============================================================================
// Key Material
// =============================================================================

/// 32 bytes of symmetric key material, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial([redacted])")
    }
}

// =============================================================================
// Sealing Key
// =============================================================================

/// Persistable description of a sealing key. Holds no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealingKeyInfo {
    pub key_id: String,
    /// Hex-encoded PBKDF2 salt.
    pub derivation_salt: String,
    pub iterations: u32,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub rotated_from: Option<String>,
}

/// A derived AES-256-GCM key plus its metadata.
#[derive(Debug)]
pub struct SealingKey {
    info: SealingKeyInfo,
    material: KeyMaterial,
}

impl SealingKey {
    /// Derive a brand-new key with a fresh random salt.
    pub fn generate(
        master_secret: &[u8],
        iterations: u32,
        rotated_from: Option<String>,
    ) -> CryptoResult<Self> {
        let mut salt = [0u8; SALT_LEN];
        fill_random(&mut salt)?;
        let material = derive_key(master_secret, &salt, iterations)?;
        let info = SealingKeyInfo {
            key_id: key_id_for(&material)?,
            derivation_salt: hex::encode(salt),
            iterations,
            algorithm: SEALING_ALGORITHM.to_string(),
            created_at: Utc::now(),
            rotated_from,
        };
        Ok(Self { info, material })
    }

    /// Re-derive a persisted key. Fails if the master secret no longer
    /// produces the recorded key id.
    pub fn restore(master_secret: &[u8], info: SealingKeyInfo) -> CryptoResult<Self> {
        if info.algorithm != SEALING_ALGORITHM {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported algorithm {}",
                info.algorithm
            )));
        }
        let salt = hex::decode(&info.derivation_salt)
            .map_err(|_| CryptoError::InvalidKey(format!("bad salt for key {}", info.key_id)))?;
        let material = derive_key(master_secret, &salt, info.iterations)?;
        if key_id_for(&material)? != info.key_id {
            return Err(CryptoError::InvalidKey(format!(
                "master secret does not reproduce key {}",
                info.key_id
            )));
        }
        Ok(Self { info, material })
    }

    pub fn id(&self) -> &str {
        &self.info.key_id
    }

    pub fn info(&self) -> &SealingKeyInfo {
        &self.info
    }

    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CryptoResult<SealedBox> {
        seal_with_aad(plaintext, &self.material, aad)
    }

    pub fn unseal(&self, sealed: &SealedBox, aad: &[u8]) -> CryptoResult<Vec<u8>> {
        unseal_with_aad(
            &sealed.ciphertext,
            &self.material,
            &sealed.nonce,
            &sealed.tag,
            aad,
        )
    }
}

/// Short public fingerprint of key material.
fn key_id_for(material: &KeyMaterial) -> CryptoResult<String> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(material.as_bytes())
        .map_err(|e| CryptoError::Failure(e.to_string()))?;
    mac.update(b"sealing-key-id");
    let digest = mac.finalize().into_bytes();
    Ok(hex::encode(&digest[..8]))
}

// =============================================================================
// Key Ring
// =============================================================================

/// All sealing keys known to one boundary instance.
///
/// Sealing uses the active key. Unsealing looks keys up by id and never
/// touches the active slot, so a rotation only blocks sealers for the
/// duration of the pointer swap.
#[derive(Debug)]
pub struct KeyRing {
    active: RwLock<Arc<SealingKey>>,
    keys: RwLock<HashMap<String, Arc<SealingKey>>>,
}

impl KeyRing {
    pub fn new(active: SealingKey) -> Self {
        let active = Arc::new(active);
        let mut keys = HashMap::new();
        keys.insert(active.id().to_string(), Arc::clone(&active));
        Self {
            active: RwLock::new(active),
            keys: RwLock::new(keys),
        }
    }

    pub fn active(&self) -> CryptoResult<Arc<SealingKey>> {
        self.active
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| CryptoError::Failure("key ring lock poisoned".to_string()))
    }

    pub fn get(&self, key_id: &str) -> CryptoResult<Arc<SealingKey>> {
        let keys = self
            .keys
            .read()
            .map_err(|_| CryptoError::Failure("key ring lock poisoned".to_string()))?;
        keys.get(key_id)
            .cloned()
            .ok_or_else(|| CryptoError::UnknownKey(key_id.to_string()))
    }

    /// Register a retired key so old records stay readable.
    pub fn insert(&self, key: SealingKey) -> CryptoResult<()> {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| CryptoError::Failure("key ring lock poisoned".to_string()))?;
        keys.insert(key.id().to_string(), Arc::new(key));
        Ok(())
    }

    /// Make `key` the active sealing key and return the previous one.
    pub fn rotate(&self, key: SealingKey) -> CryptoResult<Arc<SealingKey>> {
        let key = Arc::new(key);
        {
            let mut keys = self
                .keys
                .write()
                .map_err(|_| CryptoError::Failure("key ring lock poisoned".to_string()))?;
            keys.insert(key.id().to_string(), Arc::clone(&key));
        }
        let mut active = self
            .active
            .write()
            .map_err(|_| CryptoError::Failure("key ring lock poisoned".to_string()))?;
        Ok(std::mem::replace(&mut *active, key))
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.keys
            .read()
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }
}
