// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One trust-boundary instance.
//!
//! A `BoundaryInstance` owns its storage directory, sealed store, key ring,
//! attestation key and script runtime. Nothing is shared between instances.
//! It is not thread-safe on purpose: the bridge worker is its only user.
//!
//! ## Reserved namespaces
//!
//! `fn:`, `secret:` and `sys:` keys belong to the registry, the vault and
//! the instance itself. Raw `Store`/`Retrieve`/`Delete` calls on them are
//! refused and `ListKeys` hides them.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::blockchain::{BlockchainClient, ContractCall};
use crate::config::EnclaveConfig;
use crate::crypto::{self, SealingKeyInfo, SigningKeyPair};
use crate::error::{EnclaveError, ErrorKind};
use crate::registry::{FunctionRegistry, RegisteredFunction, FUNCTION_PREFIX};
use crate::sandbox::{ExecutionRequest, ExecutionResult, SandboxLimits, ScriptHost, ScriptRuntime};
use crate::storage::secrets::SECRET_PREFIX;
use crate::storage::{
    AuditEvent, AuditEventType, AuditLog, BoundaryFs, IntegrityReport, SealedStore, SecretVault,
    StorageError, StoragePaths, StoreOptions, StoreSettings, UsageStats,
};

use super::attestation::{probe_platform, AttestationReport, Attestor, GRAMINE_ATTESTATION_DIR};
use super::codec::{
    AttestPayload, DeleteSecretPayload, Frame, FunctionIdPayload, KeyPayload, ListKeysPayload,
    RegisterFunctionPayload, RetrieveResult, SignPayload, SignResult, StorePayload,
    StoreSecretPayload, VerifyPayload, VerifyResult,
};
use super::opcode::Opcode;

/// Key namespace for instance-internal records.
pub const SYSTEM_PREFIX: &str = "sys:";

const ATTESTATION_KEY_RECORD: &str = "sys:attestation-key";
const RESERVED_PREFIXES: [&str; 3] = [FUNCTION_PREFIX, SECRET_PREFIX, SYSTEM_PREFIX];

/// Public view of a registered function. Never carries the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub function_id: String,
    pub source_hash: String,
    pub registered_at: DateTime<Utc>,
}

impl From<&RegisteredFunction> for FunctionInfo {
    fn from(f: &RegisteredFunction) -> Self {
        Self {
            function_id: f.function_id.clone(),
            source_hash: f.source_hash.clone(),
            registered_at: f.registered_at,
        }
    }
}

struct Loaded {
    fs: BoundaryFs,
    store: SealedStore,
    attestor: Attestor,
}

pub struct BoundaryInstance {
    index: usize,
    config: EnclaveConfig,
    runtime: ScriptRuntime,
    blockchain: Arc<dyn BlockchainClient>,
    loaded: Option<Loaded>,
}

impl BoundaryInstance {
    /// Does NOT touch storage. Call `initialize()` first.
    pub fn new(index: usize, config: EnclaveConfig, blockchain: Arc<dyn BlockchainClient>) -> Self {
        let runtime = ScriptRuntime::new(SandboxLimits::from_config(&config));
        Self {
            index,
            config,
            runtime,
            blockchain,
            loaded: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_initialized(&self) -> bool {
        self.loaded.is_some()
    }

    /// Open storage and load key material. Idempotent.
    pub fn initialize(&mut self) -> Result<bool, EnclaveError> {
        if self.loaded.is_some() {
            return Ok(true);
        }
        probe_platform(self.config.platform, Path::new(GRAMINE_ATTESTATION_DIR))?;

        let paths = StoragePaths::new(self.config.instance_storage_path(self.index));
        let mut fs = BoundaryFs::new(paths.clone());
        fs.initialize()?;
        let master_secret = fs.load_or_create_master_secret()?;
        let mut store = SealedStore::new(paths, master_secret, StoreSettings::from_config(&self.config));
        store.initialize()?;

        let signer = load_or_create_attestation_key(&store)?;
        let attestor = Attestor::new(self.config.platform, self.config.attestation_ttl(), signer);

        AuditLog::new(&fs).record(
            AuditEvent::new(AuditEventType::BoundaryInitialized)
                .with_resource("instance", self.index.to_string()),
        );
        tracing::info!(
            instance = self.index,
            platform = %self.config.platform.as_str(),
            "Boundary instance initialized"
        );
        self.loaded = Some(Loaded { fs, store, attestor });
        Ok(true)
    }

    /// Close storage. Returns `false` if the instance was not initialized.
    pub fn destroy(&mut self) -> bool {
        let Some(loaded) = self.loaded.take() else {
            return false;
        };
        AuditLog::new(&loaded.fs).record(
            AuditEvent::new(AuditEventType::BoundaryDestroyed)
                .with_resource("instance", self.index.to_string()),
        );
        drop(loaded);
        tracing::info!(instance = self.index, "Boundary instance destroyed");
        true
    }

    fn loaded(&self) -> Result<&Loaded, EnclaveError> {
        self.loaded
            .as_ref()
            .ok_or_else(|| EnclaveError::boundary_unavailable("boundary instance is not initialized"))
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(loaded) = &self.loaded {
            AuditLog::new(&loaded.fs).record(event);
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Run one decoded frame.
    pub fn call(&self, frame: &Frame, cancel: CancellationToken) -> Result<serde_json::Value, EnclaveError> {
        match frame.opcode {
            Opcode::RegisterFunction => {
                let p: RegisterFunctionPayload = frame.parse()?;
                to_json(&self.register_function(&p.function_id, p.source.as_bytes())?)
            }
            Opcode::UnregisterFunction => {
                let p: FunctionIdPayload = frame.parse()?;
                to_json(&self.unregister_function(&p.function_id)?)
            }
            Opcode::ListFunctions => to_json(&self.list_functions()?),
            Opcode::ExecuteFunction => {
                let request: ExecutionRequest = frame.parse()?;
                to_json(&self.execute_function(&request, cancel)?)
            }
            Opcode::StoreSecret => {
                let p: StoreSecretPayload = frame.parse()?;
                to_json(&self.store_secret(&p.secret_id, &p.value, &p.owner)?)
            }
            Opcode::DeleteSecret => {
                let p: DeleteSecretPayload = frame.parse()?;
                to_json(&self.delete_secret(&p.secret_id, &p.owner)?)
            }
            Opcode::Store => {
                let p: StorePayload = frame.parse()?;
                to_json(&self.store(&p.key, &p.data, &p.options.clone().into())?)
            }
            Opcode::Retrieve => {
                let p: KeyPayload = frame.parse()?;
                let data = self.retrieve(&p.key, p.version)?;
                to_json(&RetrieveResult { data: data.to_vec() })
            }
            Opcode::Delete => {
                let p: KeyPayload = frame.parse()?;
                to_json(&self.delete(&p.key)?)
            }
            Opcode::ListKeys => {
                let p: ListKeysPayload = frame.parse()?;
                to_json(&self.list_keys(p.prefix.as_deref())?)
            }
            Opcode::Sign => {
                let p: SignPayload = frame.parse()?;
                to_json(&self.sign(&p.data)?)
            }
            Opcode::Verify => {
                let p: VerifyPayload = frame.parse()?;
                to_json(&VerifyResult {
                    valid: self.verify(&p.data, &p.signature, &p.public_key)?,
                })
            }
            Opcode::Attest => {
                let p: AttestPayload = frame.parse()?;
                to_json(&self.attest(&p.report_data)?)
            }
            Opcode::RotateKey => to_json(&self.rotate_key()?),
            Opcode::ValidateIntegrity => to_json(&self.validate_integrity()?),
            Opcode::UsageStats => to_json(&self.usage_stats()?),
        }
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Compile `source` and register it. Nothing is stored if the script
    /// does not compile.
    pub fn register_function(&self, function_id: &str, source: &[u8]) -> Result<FunctionInfo, EnclaveError> {
        let loaded = self.loaded()?;
        crate::storage::validate_identifier("function", function_id)?;
        let text = std::str::from_utf8(source)
            .map_err(|_| EnclaveError::invalid_argument("function source must be UTF-8"))?;
        self.runtime.compile(text)?;

        let registered = FunctionRegistry::new(&loaded.store).register(function_id, source)?;
        self.audit(
            AuditEvent::new(AuditEventType::FunctionRegistered)
                .with_resource("function", function_id)
                .with_details(serde_json::json!({ "sourceHash": registered.source_hash })),
        );
        Ok(FunctionInfo::from(&registered))
    }

    pub fn unregister_function(&self, function_id: &str) -> Result<bool, EnclaveError> {
        let loaded = self.loaded()?;
        let removed = FunctionRegistry::new(&loaded.store).unregister(function_id)?;
        self.audit(
            AuditEvent::new(AuditEventType::FunctionUnregistered).with_resource("function", function_id),
        );
        Ok(removed)
    }

    pub fn list_functions(&self) -> Result<Vec<String>, EnclaveError> {
        let loaded = self.loaded()?;
        FunctionRegistry::new(&loaded.store)
            .list()
            .map(|id| id.map_err(EnclaveError::from))
            .collect()
    }

    pub fn resolve_function(&self, function_id: &str) -> Result<RegisteredFunction, EnclaveError> {
        let loaded = self.loaded()?;
        FunctionRegistry::new(&loaded.store)
            .resolve(function_id)
            .map_err(|e| {
                let e = EnclaveError::from(e);
                if e.kind == ErrorKind::IntegrityViolation {
                    self.audit(
                        AuditEvent::new(AuditEventType::IntegrityViolation)
                            .with_resource("function", function_id)
                            .failed(e.kind.as_str()),
                    );
                }
                e
            })
    }

    /// Resolve and run a function. Script failures are reported inside the
    /// result; only lookup failures are errors.
    pub fn execute_function(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EnclaveError> {
        let loaded = self.loaded()?;
        let function = self.resolve_function(&request.function_id)?;
        let host = InstanceHost {
            vault: SecretVault::new(&loaded.store),
            audit: AuditLog::new(&loaded.fs),
            caller: &request.caller_context.caller,
            blockchain: self.blockchain.as_ref(),
        };
        let result = self.runtime.execute(&function, request, &host, cancel);

        let mut event = AuditEvent::new(AuditEventType::FunctionExecuted)
            .with_actor(request.caller_context.caller.as_str())
            .with_resource("function", request.function_id.as_str())
            .with_details(serde_json::json!({
                "durationMs": result.duration_ms,
                "state": result.state,
            }));
        if let Some(kind) = result.error_kind {
            event = event.failed(kind.as_str());
        }
        self.audit(event);
        Ok(result)
    }

    // =========================================================================
    // Secrets
    // =========================================================================

    pub fn store_secret(&self, secret_id: &str, value: &[u8], owner: &str) -> Result<bool, EnclaveError> {
        let loaded = self.loaded()?;
        let stored = SecretVault::new(&loaded.store)
            .store(secret_id, value, owner)
            .map_err(|e| {
                let e = EnclaveError::from(e);
                match std::str::from_utf8(value) {
                    Ok(text) => e.scrubbed(&[text]),
                    Err(_) => e,
                }
            })?;
        self.audit(
            AuditEvent::new(AuditEventType::SecretStored)
                .with_actor(owner)
                .with_resource("secret", secret_id),
        );
        Ok(stored)
    }

    pub fn delete_secret(&self, secret_id: &str, owner: &str) -> Result<bool, EnclaveError> {
        let loaded = self.loaded()?;
        let deleted = SecretVault::new(&loaded.store).delete(secret_id, owner)?;
        self.audit(
            AuditEvent::new(AuditEventType::SecretDeleted)
                .with_actor(owner)
                .with_resource("secret", secret_id),
        );
        Ok(deleted)
    }

    // =========================================================================
    // Raw records
    // =========================================================================

    pub fn store(&self, key: &str, data: &[u8], options: &StoreOptions) -> Result<bool, EnclaveError> {
        ensure_unreserved(key)?;
        Ok(self.loaded()?.store.store(key, data, options)?)
    }

    pub fn retrieve(&self, key: &str, version: Option<u32>) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        ensure_unreserved(key)?;
        let store = &self.loaded()?.store;
        let data = match version {
            Some(version) => store.retrieve_version(key, version),
            None => store.retrieve(key),
        };
        match data {
            Ok(data) => Ok(Zeroizing::new(data)),
            Err(e @ (StorageError::IntegrityViolation(_) | StorageError::CorruptManifest(_))) => {
                self.audit(
                    AuditEvent::new(AuditEventType::IntegrityViolation)
                        .with_resource("record", key)
                        .failed(e.kind().as_str()),
                );
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, key: &str) -> Result<bool, EnclaveError> {
        ensure_unreserved(key)?;
        Ok(self.loaded()?.store.delete(key)?)
    }

    /// Keys outside the reserved namespaces, optionally under `prefix`.
    pub fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, EnclaveError> {
        let store = &self.loaded()?.store;
        let mut keys = Vec::new();
        for key in store.list_keys(prefix) {
            let key = key?;
            if !is_reserved(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    // =========================================================================
    // Crypto, attestation and maintenance
    // =========================================================================

    /// Sign with the instance attestation key.
    pub fn sign(&self, data: &[u8]) -> Result<SignResult, EnclaveError> {
        let signer = self.loaded()?.attestor.signer();
        Ok(SignResult {
            signature: signer.sign(data),
            public_key: signer.public_key(),
        })
    }

    pub fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool, EnclaveError> {
        Ok(crypto::verify(data, signature, public_key)?)
    }

    pub fn attest(&self, report_data: &[u8]) -> Result<AttestationReport, EnclaveError> {
        let report = self.loaded()?.attestor.generate(report_data)?;
        self.audit(
            AuditEvent::new(AuditEventType::AttestationGenerated)
                .with_resource("instance", self.index.to_string())
                .with_details(serde_json::json!({ "validUntil": report.valid_until })),
        );
        Ok(report)
    }

    pub fn rotate_key(&self) -> Result<SealingKeyInfo, EnclaveError> {
        let info = self.loaded()?.store.rotate_key()?;
        self.audit(
            AuditEvent::new(AuditEventType::KeyRotated)
                .with_resource("key", info.key_id.as_str())
                .with_details(serde_json::json!({ "rotatedFrom": info.rotated_from })),
        );
        Ok(info)
    }

    pub fn validate_integrity(&self) -> Result<IntegrityReport, EnclaveError> {
        let report = self.loaded()?.store.validate_integrity()?;
        if !report.is_clean() {
            tracing::error!(
                instance = self.index,
                corrupt = report.corrupt_keys.len(),
                "Integrity scan found corrupt records"
            );
            self.audit(
                AuditEvent::new(AuditEventType::IntegrityViolation)
                    .with_resource("store", self.index.to_string())
                    .with_details(serde_json::json!({ "corruptKeys": report.corrupt_keys.len() }))
                    .failed(ErrorKind::IntegrityViolation.as_str()),
            );
        }
        Ok(report)
    }

    pub fn usage_stats(&self) -> Result<UsageStats, EnclaveError> {
        Ok(self.loaded()?.store.usage_stats()?)
    }

    /// Probe storage and key ring.
    pub fn health_check(&self) -> Result<(), EnclaveError> {
        let loaded = self.loaded()?;
        loaded.fs.health_check()?;
        loaded.store.health_check()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn sealed_store(&self) -> Option<&SealedStore> {
        self.loaded.as_ref().map(|l| &l.store)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, EnclaveError> {
    serde_json::to_value(value).map_err(|e| EnclaveError::internal(e.to_string()))
}

fn is_reserved(key: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

fn ensure_unreserved(key: &str) -> Result<(), EnclaveError> {
    if is_reserved(key) {
        return Err(EnclaveError::new(
            ErrorKind::PermissionDenied,
            "key is in a reserved namespace",
        ));
    }
    Ok(())
}

fn load_or_create_attestation_key(store: &SealedStore) -> Result<SigningKeyPair, EnclaveError> {
    match store.retrieve(ATTESTATION_KEY_RECORD) {
        Ok(bytes) => {
            let bytes = Zeroizing::new(bytes);
            Ok(SigningKeyPair::from_bytes(&bytes)?)
        }
        Err(StorageError::NotFound(_)) => {
            let signer = SigningKeyPair::generate()?;
            store.store(
                ATTESTATION_KEY_RECORD,
                &signer.to_bytes(),
                &StoreOptions::create_only(),
            )?;
            tracing::info!("Attestation key generated");
            Ok(signer)
        }
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Script host
// =============================================================================

/// Host callbacks for one execution: secrets of the calling identity and
/// the configured blockchain client.
struct InstanceHost<'a> {
    vault: SecretVault<'a>,
    audit: AuditLog<'a>,
    caller: &'a str,
    blockchain: &'a dyn BlockchainClient,
}

impl ScriptHost for InstanceHost<'_> {
    fn secret(&self, secret_id: &str) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let result = self
            .vault
            .resolve(secret_id, self.caller)
            .map_err(EnclaveError::from);
        let mut event = AuditEvent::new(AuditEventType::SecretAccessed)
            .with_actor(self.caller)
            .with_resource("secret", secret_id);
        if let Err(e) = &result {
            event = event.failed(e.kind.as_str());
        }
        self.audit.record(event);
        result
    }

    fn call_contract(
        &self,
        address: &str,
        method: &str,
        params: &serde_json::Value,
        timeout: std::time::Duration,
    ) -> Result<serde_json::Value, EnclaveError> {
        let call = ContractCall {
            address: address.to_string(),
            method: method.to_string(),
            params: params.clone(),
        };
        self.blockchain.call_contract(&call, timeout)
    }

    fn get_balance(&self, address: &str, timeout: std::time::Duration) -> Result<String, EnclaveError> {
        self.blockchain.get_balance(address, timeout)
    }

    fn get_storage(
        &self,
        address: &str,
        slot: &str,
        timeout: std::time::Duration,
    ) -> Result<String, EnclaveError> {
        self.blockchain.get_storage(address, slot, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::UnavailableBlockchain;
    use crate::bridge::codec::{decode_frame, encode_request};
    use crate::config::Platform;
    use crate::crypto::kdf::MIN_ITERATIONS;
    use crate::sandbox::CallerContext;
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> EnclaveConfig {
        EnclaveConfig {
            kdf_iterations: MIN_ITERATIONS,
            chunk_size_bytes: 64,
            ..EnclaveConfig::with_storage_path(temp.path())
        }
    }

    fn setup() -> (TempDir, BoundaryInstance) {
        let temp = TempDir::new().unwrap();
        let mut instance = BoundaryInstance::new(0, config(&temp), Arc::new(UnavailableBlockchain));
        assert!(instance.initialize().unwrap());
        (temp, instance)
    }

    fn request(function_id: &str, params: &str, caller: &str) -> ExecutionRequest {
        ExecutionRequest {
            caller_context: CallerContext {
                blockchain_type: "neo-n3".into(),
                caller: caller.into(),
                timestamp_hint: None,
            },
            ..ExecutionRequest::new(function_id, params)
        }
    }

    #[test]
    fn initialize_is_idempotent_and_keeps_keys() {
        let temp = TempDir::new().unwrap();
        let mut instance = BoundaryInstance::new(0, config(&temp), Arc::new(UnavailableBlockchain));
        instance.initialize().unwrap();
        let key = instance.sign(b"x").unwrap().public_key;
        assert!(instance.initialize().unwrap());

        assert!(instance.destroy());
        assert!(!instance.destroy());
        instance.initialize().unwrap();
        assert_eq!(instance.sign(b"x").unwrap().public_key, key);
    }

    #[test]
    fn gramine_without_device_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.platform = Platform::Gramine;
        let mut instance = BoundaryInstance::new(0, config, Arc::new(UnavailableBlockchain));
        if Path::new(GRAMINE_ATTESTATION_DIR).join("quote").exists() {
            return;
        }
        let err = instance.initialize().unwrap_err();
        assert_eq!(err.kind, ErrorKind::BoundaryUnavailable);
        assert!(!instance.is_initialized());
    }

    #[test]
    fn calls_before_initialize_fail() {
        let temp = TempDir::new().unwrap();
        let instance = BoundaryInstance::new(0, config(&temp), Arc::new(UnavailableBlockchain));
        assert_eq!(
            instance.list_functions().unwrap_err().kind,
            ErrorKind::BoundaryUnavailable
        );
    }

    #[test]
    fn register_and_execute() {
        let (_temp, instance) = setup();
        let info = instance
            .register_function("double", b"function double(x){return x*2}")
            .unwrap();
        assert_eq!(info.source_hash, crypto::sha256_hex(b"function double(x){return x*2}"));

        let result = instance
            .execute_function(&request("double", r#"{"x":21}"#, "alice"), CancellationToken::new())
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output_json.as_deref(), Some("42"));
        assert_eq!(instance.list_functions().unwrap(), vec!["double".to_string()]);
    }

    #[test]
    fn invalid_scripts_are_not_registered() {
        let (_temp, instance) = setup();
        let err = instance
            .register_function("bad", b"function main() { return eval('1'); }")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ScriptError);
        assert!(instance.list_functions().unwrap().is_empty());
    }

    #[test]
    fn duplicate_registration_keeps_the_original() {
        let (_temp, instance) = setup();
        let first = instance.register_function("f", b"function f() { return 1; }").unwrap();
        let err = instance
            .register_function("f", b"function f() { return 2; }")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateFunction);
        assert_eq!(
            instance.resolve_function("f").unwrap().source_hash,
            first.source_hash
        );
    }

    #[test]
    fn unknown_function_is_not_found() {
        let (_temp, instance) = setup();
        let err = instance
            .execute_function(&request("ghost", "", "alice"), CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn secrets_reach_only_their_owner() {
        let (_temp, instance) = setup();
        instance.store_secret("api-key", b"s3cr3t", "owner1").unwrap();
        instance
            .register_function("reveal", b"function reveal() { return secrets.get('api-key'); }")
            .unwrap();

        let result = instance
            .execute_function(&request("reveal", "", "owner1"), CancellationToken::new())
            .unwrap();
        assert_eq!(result.output_json.as_deref(), Some(r#""s3cr3t""#));

        let result = instance
            .execute_function(&request("reveal", "", "mallory"), CancellationToken::new())
            .unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::PermissionDenied));
        assert!(!result.error_message.unwrap_or_default().contains("s3cr3t"));

        let err = instance.store_secret("api-key", b"other", "mallory").unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[test]
    fn blockchain_calls_without_endpoint_are_unavailable() {
        let (_temp, instance) = setup();
        instance
            .register_function("bal", b"function bal() { return blockchain.getBalance('0x01'); }")
            .unwrap();
        let result = instance
            .execute_function(&request("bal", "", "alice"), CancellationToken::new())
            .unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::BlockchainUnavailable));
    }

    #[test]
    fn reserved_namespaces_are_protected() {
        let (_temp, instance) = setup();
        instance.register_function("f", b"function f() {}").unwrap();
        for key in ["fn:f", "secret:x", "sys:attestation-key"] {
            assert_eq!(
                instance.retrieve(key, None).unwrap_err().kind,
                ErrorKind::PermissionDenied
            );
            assert_eq!(
                instance.store(key, b"x", &StoreOptions::default()).unwrap_err().kind,
                ErrorKind::PermissionDenied
            );
        }
        instance.store("user/a", b"1", &StoreOptions::default()).unwrap();
        assert_eq!(instance.list_keys(None).unwrap(), vec!["user/a".to_string()]);
    }

    #[test]
    fn records_round_trip_through_frames() {
        let (_temp, instance) = setup();
        let data = vec![42u8; 1000];
        let store = encode_request(
            Opcode::Store,
            &serde_json::json!({
                "key": "blob",
                "data": <base64ct::Base64 as base64ct::Encoding>::encode_string(&data),
                "options": { "compress": true },
            }),
        )
        .unwrap();
        let frame = decode_frame(&store, 1 << 20).unwrap();
        assert_eq!(
            instance.call(&frame, CancellationToken::new()).unwrap(),
            serde_json::json!(true)
        );

        let retrieve = encode_request(Opcode::Retrieve, &serde_json::json!({ "key": "blob" })).unwrap();
        let frame = decode_frame(&retrieve, 1 << 20).unwrap();
        let value = instance.call(&frame, CancellationToken::new()).unwrap();
        let result: RetrieveResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.data, data);
    }

    #[test]
    fn sign_verify_and_attest() {
        let (_temp, instance) = setup();
        let signed = instance.sign(b"payload").unwrap();
        assert!(instance
            .verify(b"payload", &signed.signature, &signed.public_key)
            .unwrap());
        assert!(!instance
            .verify(b"other", &signed.signature, &signed.public_key)
            .unwrap());

        let report = instance.attest(b"nonce").unwrap();
        crate::bridge::attestation::verify_report(&report, Utc::now()).unwrap();
        assert_eq!(report.public_key, signed.public_key);
    }

    #[test]
    fn tampered_function_record_refuses_to_run() {
        let (_temp, instance) = setup();
        instance.register_function("f", b"function f() { return 1; }").unwrap();

        // Rewrite the record with a valid seal but altered source.
        let store = instance.sealed_store().unwrap();
        let raw = store.retrieve("fn:f").unwrap();
        let mut record: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        record["source"] = serde_json::json!("function f() { return 2; }");
        store
            .store("fn:f", &serde_json::to_vec(&record).unwrap(), &StoreOptions::default())
            .unwrap();

        let err = instance
            .execute_function(&request("f", "", "alice"), CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityViolation);
    }

    #[test]
    fn maintenance_operations() {
        let (_temp, instance) = setup();
        instance.store("a", b"hello", &StoreOptions::default()).unwrap();
        let before = instance.loaded().unwrap().store.active_key_id().unwrap();
        let info = instance.rotate_key().unwrap();
        assert_eq!(info.rotated_from.as_deref(), Some(before.as_str()));
        assert_eq!(instance.retrieve("a", None).unwrap().as_slice(), b"hello");
        assert!(instance.validate_integrity().unwrap().is_clean());
        assert!(instance.usage_stats().unwrap().total_keys >= 1);
        instance.health_check().unwrap();
    }
}
