// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Function Registry
//!
//! Maps a function id to its script source, persisted in the sealed store
//! under `fn:<functionId>`.
//!
//! ## Security Model
//!
//! - Registration never overwrites. A function must be unregistered before
//!   its id can be reused, so trusted code cannot be swapped in place.
//! - The duplicate check and the write are one `create_only` store.
//! - The source hash is recomputed on every resolve. A mismatch refuses
//!   execution even if the storage layer did not notice the change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;
use crate::error::{EnclaveError, ErrorKind};
use crate::storage::{validate_identifier, SealedStore, StorageError, StoreOptions};

/// Key namespace for registered functions.
pub const FUNCTION_PREFIX: &str = "fn:";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("function {0} is already registered")]
    DuplicateFunction(String),

    #[error("function {0} not found")]
    NotFound(String),

    #[error("function {0} failed its source hash check")]
    IntegrityViolation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RegistryError::DuplicateFunction(_) => ErrorKind::DuplicateFunction,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            RegistryError::Storage(e) => e.kind(),
        }
    }
}

impl From<RegistryError> for EnclaveError {
    fn from(err: RegistryError) -> Self {
        EnclaveError::new(err.kind(), err.to_string())
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// A registered script function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredFunction {
    pub function_id: String,
    /// Lowercase hex SHA-256 of `source`.
    pub source_hash: String,
    pub source: String,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredFunction {
    fn hash_matches(&self) -> bool {
        sha256_hex(self.source.as_bytes()) == self.source_hash
    }
}

pub fn function_key(function_id: &str) -> String {
    format!("{FUNCTION_PREFIX}{function_id}")
}

/// Registry operations for one sealed store.
pub struct FunctionRegistry<'a> {
    store: &'a SealedStore,
}

impl<'a> FunctionRegistry<'a> {
    pub fn new(store: &'a SealedStore) -> Self {
        Self { store }
    }

    /// Register `source` under `function_id`. Fails with
    /// `DuplicateFunction` if the id is taken.
    pub fn register(&self, function_id: &str, source: &[u8]) -> RegistryResult<RegisteredFunction> {
        validate_identifier("function", function_id)?;
        let source = std::str::from_utf8(source)
            .map_err(|_| RegistryError::InvalidArgument("source must be UTF-8".to_string()))?;
        if source.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "source must not be empty".to_string(),
            ));
        }

        let function = RegisteredFunction {
            function_id: function_id.to_string(),
            source_hash: sha256_hex(source.as_bytes()),
            source: source.to_string(),
            registered_at: Utc::now(),
        };
        let json = serde_json::to_vec(&function).map_err(StorageError::from)?;

        match self
            .store
            .store(&function_key(function_id), &json, &StoreOptions::create_only())
        {
            Ok(_) => {
                tracing::info!(
                    function_id = %function_id,
                    source_hash = %function.source_hash,
                    "Function registered"
                );
                Ok(function)
            }
            Err(StorageError::AlreadyExists(_)) => {
                Err(RegistryError::DuplicateFunction(function_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load a function and verify its source hash.
    pub fn resolve(&self, function_id: &str) -> RegistryResult<RegisteredFunction> {
        validate_identifier("function", function_id)?;
        let raw = match self.store.retrieve(&function_key(function_id)) {
            Ok(raw) => raw,
            Err(StorageError::NotFound(_)) => {
                return Err(RegistryError::NotFound(function_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let function: RegisteredFunction =
            serde_json::from_slice(&raw).map_err(StorageError::from)?;

        if function.function_id != function_id || !function.hash_matches() {
            tracing::error!(function_id = %function_id, "Registered source failed hash check");
            return Err(RegistryError::IntegrityViolation(function_id.to_string()));
        }
        Ok(function)
    }

    pub fn unregister(&self, function_id: &str) -> RegistryResult<bool> {
        validate_identifier("function", function_id)?;
        match self.store.delete(&function_key(function_id)) {
            Ok(_) => {
                tracing::info!(function_id = %function_id, "Function unregistered");
                Ok(true)
            }
            Err(StorageError::NotFound(_)) => Err(RegistryError::NotFound(function_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, function_id: &str) -> RegistryResult<bool> {
        Ok(self.store.exists(&function_key(function_id))?)
    }

    /// Lazily enumerate registered function ids. Every call re-reads the
    /// current state.
    pub fn list(&self) -> impl Iterator<Item = RegistryResult<String>> + 'a {
        self.store.list_keys(Some(FUNCTION_PREFIX)).map(|key| {
            key.map(|k| k[FUNCTION_PREFIX.len()..].to_string())
                .map_err(RegistryError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::MIN_ITERATIONS;
    use crate::retry::RetryPolicy;
    use crate::storage::{StoragePaths, StoreSettings};
    use tempfile::TempDir;
    use zeroize::Zeroizing;

    fn setup() -> (TempDir, SealedStore) {
        let temp = TempDir::new().unwrap();
        let mut store = SealedStore::new(
            StoragePaths::new(temp.path()),
            Zeroizing::new(vec![5u8; 32]),
            StoreSettings {
                kdf_iterations: MIN_ITERATIONS,
                chunk_size_bytes: 0,
                retry: RetryPolicy::immediate(1),
            },
        );
        store.initialize().unwrap();
        (temp, store)
    }

    const SRC1: &[u8] = b"function f(x) { return x + 1; }";
    const SRC2: &[u8] = b"function f(x) { return x + 2; }";

    #[test]
    fn register_and_resolve() {
        let (_temp, store) = setup();
        let registry = FunctionRegistry::new(&store);

        let registered = registry.register("double", b"function double(x){return x*2}").unwrap();
        assert_eq!(
            registered.source_hash,
            sha256_hex(b"function double(x){return x*2}")
        );

        let resolved = registry.resolve("double").unwrap();
        assert_eq!(resolved, registered);
        assert!(store.exists("fn:double").unwrap());
    }

    #[test]
    fn duplicate_registration_keeps_original() {
        let (_temp, store) = setup();
        let registry = FunctionRegistry::new(&store);

        registry.register("f", SRC1).unwrap();
        let err = registry.register("f", SRC2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateFunction);
        assert_eq!(registry.resolve("f").unwrap().source_hash, sha256_hex(SRC1));
    }

    #[test]
    fn reregistration_after_unregister() {
        let (_temp, store) = setup();
        let registry = FunctionRegistry::new(&store);

        registry.register("f", SRC1).unwrap();
        assert!(registry.unregister("f").unwrap());
        assert_eq!(registry.resolve("f").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(registry.unregister("f").unwrap_err().kind(), ErrorKind::NotFound);

        registry.register("f", SRC2).unwrap();
        assert_eq!(registry.resolve("f").unwrap().source_hash, sha256_hex(SRC2));
    }

    #[test]
    fn altered_source_refuses_to_resolve() {
        let (_temp, store) = setup();
        let registry = FunctionRegistry::new(&store);
        registry.register("f", SRC1).unwrap();

        // A record whose bytes authenticate fine but whose source no longer
        // matches the recorded hash.
        let mut forged = registry.resolve("f").unwrap();
        forged.source = String::from_utf8(SRC2.to_vec()).unwrap();
        store
            .store("fn:f", &serde_json::to_vec(&forged).unwrap(), &StoreOptions::default())
            .unwrap();

        assert_eq!(
            registry.resolve("f").unwrap_err().kind(),
            ErrorKind::IntegrityViolation
        );
    }

    #[test]
    fn list_is_restartable() {
        let (_temp, store) = setup();
        let registry = FunctionRegistry::new(&store);
        registry.register("a", SRC1).unwrap();
        registry.register("b", SRC1).unwrap();

        let ids: Vec<String> = registry.list().collect::<RegistryResult<_>>().unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        registry.unregister("a").unwrap();
        let ids: Vec<String> = registry.list().collect::<RegistryResult<_>>().unwrap();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[test]
    fn invalid_registrations_are_rejected() {
        let (_temp, store) = setup();
        let registry = FunctionRegistry::new(&store);
        assert_eq!(
            registry.register("bad id", SRC1).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            registry.register("f", &[0xff, 0xfe]).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            registry.register("f", b"   ").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }
}
