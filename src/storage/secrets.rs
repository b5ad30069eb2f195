// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Owner-scoped secret storage on top of the sealed store.
//!
//! Secrets live under `secret:<id>` as always-encrypted records. Every
//! read and write is checked against the recorded owner.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::{validate_identifier, SealedStore, StorageError, StorageResult, StoreOptions};

/// Key namespace for secrets.
pub const SECRET_PREFIX: &str = "secret:";

/// Resources that belong to exactly one owner.
pub trait OwnedResource {
    fn owner_id(&self) -> &str;

    /// # Errors
    /// Returns `StorageError::PermissionDenied` if `caller` is not the owner.
    fn verify_owner(&self, caller: &str, resource: &str) -> StorageResult<()> {
        if self.owner_id() == caller {
            Ok(())
        } else {
            Err(StorageError::PermissionDenied(format!(
                "{caller} does not own {resource}"
            )))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SecretRecord {
    owner: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Base64 secret bytes.
    value: String,
}

impl OwnedResource for SecretRecord {
    fn owner_id(&self) -> &str {
        &self.owner
    }
}

impl Drop for SecretRecord {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

pub fn secret_key(id: &str) -> String {
    format!("{SECRET_PREFIX}{id}")
}

/// Secret operations for one sealed store.
pub struct SecretVault<'a> {
    store: &'a SealedStore,
}

impl<'a> SecretVault<'a> {
    pub fn new(store: &'a SealedStore) -> Self {
        Self { store }
    }

    /// Create or replace a secret. Replacing requires the same owner.
    pub fn store(&self, id: &str, secret: &[u8], owner: &str) -> StorageResult<bool> {
        validate_identifier("secret", id)?;
        if owner.is_empty() {
            return Err(StorageError::InvalidArgument(
                "secret owner must not be empty".to_string(),
            ));
        }
        if secret.is_empty() {
            return Err(StorageError::InvalidArgument(
                "secret value must not be empty".to_string(),
            ));
        }

        let key = secret_key(id);
        let now = Utc::now();
        let created_at = match self.load(&key) {
            Ok(existing) => {
                existing.verify_owner(owner, &key)?;
                existing.created_at
            }
            Err(StorageError::NotFound(_)) => now,
            Err(e) => return Err(e),
        };

        let record = SecretRecord {
            owner: owner.to_string(),
            created_at,
            updated_at: now,
            value: Base64::encode_string(secret),
        };
        let json = Zeroizing::new(serde_json::to_vec(&record)?);
        self.store.store(&key, &json, &StoreOptions::default())?;

        tracing::info!(secret_id = %id, owner = %owner, "Secret stored");
        Ok(true)
    }

    /// Secret bytes for `caller`, who must own the secret.
    pub fn resolve(&self, id: &str, caller: &str) -> StorageResult<Zeroizing<Vec<u8>>> {
        validate_identifier("secret", id)?;
        let key = secret_key(id);
        let record = self.load(&key)?;
        record.verify_owner(caller, &key)?;

        Base64::decode_vec(&record.value)
            .map(Zeroizing::new)
            .map_err(|_| StorageError::CorruptManifest(format!("{key}: value is not base64")))
    }

    pub fn delete(&self, id: &str, owner: &str) -> StorageResult<bool> {
        validate_identifier("secret", id)?;
        let key = secret_key(id);
        self.load(&key)?.verify_owner(owner, &key)?;
        self.store.delete(&key)?;

        tracing::info!(secret_id = %id, "Secret deleted");
        Ok(true)
    }

    pub fn owner(&self, id: &str) -> StorageResult<String> {
        validate_identifier("secret", id)?;
        Ok(self.load(&secret_key(id))?.owner.clone())
    }

    /// Ids of every stored secret.
    pub fn list_ids(&self) -> StorageResult<Vec<String>> {
        self.store
            .list_keys(Some(SECRET_PREFIX))
            .map(|key| key.map(|k| k[SECRET_PREFIX.len()..].to_string()))
            .collect()
    }

    fn load(&self, key: &str) -> StorageResult<SecretRecord> {
        let raw = Zeroizing::new(self.store.retrieve(key)?);
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::MIN_ITERATIONS;
    use crate::retry::RetryPolicy;
    use crate::storage::{StoragePaths, StoreSettings};
    use tempfile::TempDir;

    fn setup() -> (TempDir, SealedStore) {
        let temp = TempDir::new().unwrap();
        let mut store = SealedStore::new(
            StoragePaths::new(temp.path()),
            Zeroizing::new(vec![3u8; 32]),
            StoreSettings {
                kdf_iterations: MIN_ITERATIONS,
                chunk_size_bytes: 0,
                retry: RetryPolicy::immediate(1),
            },
        );
        store.initialize().unwrap();
        (temp, store)
    }

    #[test]
    fn owner_can_resolve_secret() {
        let (_temp, store) = setup();
        let vault = SecretVault::new(&store);

        vault.store("api-key", b"s3cr3t", "owner1").unwrap();
        assert_eq!(&*vault.resolve("api-key", "owner1").unwrap(), b"s3cr3t");
        assert_eq!(vault.owner("api-key").unwrap(), "owner1");
        assert_eq!(vault.list_ids().unwrap(), vec!["api-key".to_string()]);
    }

    #[test]
    fn other_callers_are_denied() {
        let (_temp, store) = setup();
        let vault = SecretVault::new(&store);
        vault.store("api-key", b"s3cr3t", "owner1").unwrap();

        assert!(matches!(
            vault.resolve("api-key", "mallory"),
            Err(StorageError::PermissionDenied(_))
        ));
        assert!(matches!(
            vault.store("api-key", b"hijack", "mallory"),
            Err(StorageError::PermissionDenied(_))
        ));
        assert!(matches!(
            vault.delete("api-key", "mallory"),
            Err(StorageError::PermissionDenied(_))
        ));
        assert_eq!(&*vault.resolve("api-key", "owner1").unwrap(), b"s3cr3t");
    }

    #[test]
    fn owner_can_replace_and_delete() {
        let (_temp, store) = setup();
        let vault = SecretVault::new(&store);
        vault.store("token", b"one", "alice").unwrap();
        vault.store("token", b"two", "alice").unwrap();
        assert_eq!(&*vault.resolve("token", "alice").unwrap(), b"two");

        vault.delete("token", "alice").unwrap();
        assert!(matches!(
            vault.resolve("token", "alice"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn secrets_are_sealed_at_rest() {
        let (_temp, store) = setup();
        SecretVault::new(&store)
            .store("api-key", b"s3cr3t", "owner1")
            .unwrap();
        let manifest = store.metadata(&secret_key("api-key")).unwrap();
        assert!(manifest.encrypted);
        assert!(manifest.key_id.is_some());
    }

    #[test]
    fn invalid_input_is_rejected() {
        let (_temp, store) = setup();
        let vault = SecretVault::new(&store);
        assert!(vault.store("bad id", b"x", "o").is_err());
        assert!(vault.store("ok", b"", "o").is_err());
        assert!(vault.store("ok", b"x", "").is_err());
    }
}
