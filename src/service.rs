// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The capability interface offered to the orchestration layer.
//!
//! Callers need four operations: register a function, execute it, store a
//! secret and attest. Each becomes one bridge call on the instance that owns
//! the data. `handle` routes a tagged request for transports that carry a
//! single message type.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::bridge::codec::{
    base64_bytes, base64_secret, DeleteSecretPayload, FunctionIdPayload, RegisterFunctionPayload,
    StoreSecretPayload,
};
use crate::bridge::{AttestationReport, BoundaryPool, FunctionInfo, Opcode};
use crate::error::{EnclaveError, ErrorKind};
use crate::sandbox::{ExecutionRequest, ExecutionResult};

/// Tagged request for [`EnclaveService::handle`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum ServiceRequest {
    #[serde(rename_all = "camelCase")]
    RegisterFunction { function_id: String, source: String },
    ExecuteFunction(ExecutionRequest),
    #[serde(rename_all = "camelCase")]
    StoreSecret {
        secret_id: String,
        #[serde(with = "base64_secret")]
        value: Zeroizing<Vec<u8>>,
        owner: String,
    },
    #[serde(rename_all = "camelCase")]
    Attest {
        #[serde(default, with = "base64_bytes")]
        report_data: Vec<u8>,
    },
}

impl ServiceRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            ServiceRequest::RegisterFunction { .. } => "registerFunction",
            ServiceRequest::ExecuteFunction(_) => "executeFunction",
            ServiceRequest::StoreSecret { .. } => "storeSecret",
            ServiceRequest::Attest { .. } => "attest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", content = "result", rename_all = "camelCase")]
pub enum ServiceResponse {
    RegisterFunction(FunctionInfo),
    ExecuteFunction(ExecutionResult),
    StoreSecret(bool),
    Attest(AttestationReport),
}

#[derive(Clone)]
pub struct EnclaveService {
    pool: Arc<BoundaryPool>,
}

impl EnclaveService {
    pub fn new(pool: Arc<BoundaryPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &BoundaryPool {
        &self.pool
    }

    pub async fn register_function(
        &self,
        function_id: &str,
        source: &str,
    ) -> Result<FunctionInfo, EnclaveError> {
        let payload = RegisterFunctionPayload {
            function_id: function_id.to_string(),
            source: source.to_string(),
        };
        let value = self
            .pool
            .route(function_id)
            .call(Opcode::RegisterFunction, &payload)
            .await?;
        decode(value)
    }

    pub async fn unregister_function(&self, function_id: &str) -> Result<bool, EnclaveError> {
        let payload = FunctionIdPayload {
            function_id: function_id.to_string(),
        };
        let value = self
            .pool
            .route(function_id)
            .call(Opcode::UnregisterFunction, &payload)
            .await?;
        decode(value)
    }

    /// Function ids across all instances, sorted.
    pub async fn list_functions(&self) -> Result<Vec<String>, EnclaveError> {
        let mut ids = Vec::new();
        for bridge in self.pool.bridges() {
            let value = bridge
                .call(Opcode::ListFunctions, &serde_json::json!({}))
                .await?;
            ids.extend(decode::<Vec<String>>(value)?);
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Script failures come back as `success: false`; lookup failures are
    /// errors.
    pub async fn execute_function(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, EnclaveError> {
        let value = self
            .pool
            .route(&request.function_id)
            .call(Opcode::ExecuteFunction, request)
            .await?;
        decode(value)
    }

    /// Written to every instance. If any instance refuses, the secret is
    /// removed again from every reachable instance before the error is
    /// returned, so it is never readable on some instances only.
    pub async fn store_secret(
        &self,
        secret_id: &str,
        value: &[u8],
        owner: &str,
    ) -> Result<bool, EnclaveError> {
        let payload = StoreSecretPayload {
            secret_id: secret_id.to_string(),
            value: Zeroizing::new(value.to_vec()),
            owner: owner.to_string(),
        };
        let mut stored = true;
        for (index, bridge) in self.pool.bridges().iter().enumerate() {
            let result = bridge
                .call(Opcode::StoreSecret, &payload)
                .await
                .and_then(decode::<bool>);
            match result {
                Ok(ok) => stored &= ok,
                Err(e) => {
                    if index > 0 {
                        tracing::warn!(
                            secret_id = %secret_id,
                            instance = index,
                            error_kind = %e.kind,
                            "Secret broadcast failed, removing partial copies"
                        );
                        if let Err(cleanup) = self.delete_secret(secret_id, owner).await {
                            tracing::error!(
                                secret_id = %secret_id,
                                error_kind = %cleanup.kind,
                                "Partial secret copies could not all be removed"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        tracing::info!(secret_id = %secret_id, owner = %owner, "Secret stored");
        Ok(stored)
    }

    /// Deleted from every reachable instance. The first failure is returned
    /// after the remaining instances have been tried. `NotFound` only when
    /// no instance held the secret.
    pub async fn delete_secret(&self, secret_id: &str, owner: &str) -> Result<bool, EnclaveError> {
        let payload = DeleteSecretPayload {
            secret_id: secret_id.to_string(),
            owner: owner.to_string(),
        };
        let mut deleted = false;
        let mut missing = None;
        let mut failure = None;
        for (index, bridge) in self.pool.bridges().iter().enumerate() {
            let result = bridge
                .call(Opcode::DeleteSecret, &payload)
                .await
                .and_then(decode::<bool>);
            match result {
                Ok(removed) => deleted |= removed,
                Err(e) if e.kind == ErrorKind::NotFound => {
                    missing.get_or_insert(e);
                }
                Err(e) => {
                    tracing::warn!(
                        secret_id = %secret_id,
                        instance = index,
                        error_kind = %e.kind,
                        "Secret delete failed on instance"
                    );
                    failure.get_or_insert(e);
                }
            }
        }
        match (failure, missing) {
            (Some(e), _) => Err(e),
            (None, Some(e)) if !deleted => Err(e),
            _ => Ok(deleted),
        }
    }

    pub async fn attest(&self, report_data: &[u8]) -> Result<AttestationReport, EnclaveError> {
        self.pool.primary().attest(report_data).await
    }

    pub async fn handle(&self, request: ServiceRequest) -> Result<ServiceResponse, EnclaveError> {
        tracing::debug!(operation = request.operation(), "Handling service request");
        match request {
            ServiceRequest::RegisterFunction {
                function_id,
                source,
            } => self
                .register_function(&function_id, &source)
                .await
                .map(ServiceResponse::RegisterFunction),
            ServiceRequest::ExecuteFunction(request) => self
                .execute_function(&request)
                .await
                .map(ServiceResponse::ExecuteFunction),
            ServiceRequest::StoreSecret {
                secret_id,
                value,
                owner,
            } => self
                .store_secret(&secret_id, &value, &owner)
                .await
                .map(ServiceResponse::StoreSecret),
            ServiceRequest::Attest { report_data } => self
                .attest(&report_data)
                .await
                .map(ServiceResponse::Attest),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, EnclaveError> {
    serde_json::from_value(value).map_err(|e| EnclaveError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::UnavailableBlockchain;
    use crate::config::EnclaveConfig;
    use crate::crypto::kdf::MIN_ITERATIONS;
    use crate::sandbox::CallerContext;
    use tempfile::TempDir;

    async fn service(temp: &TempDir, instances: usize) -> EnclaveService {
        let config = EnclaveConfig {
            kdf_iterations: MIN_ITERATIONS,
            instance_count: instances,
            ..EnclaveConfig::with_storage_path(temp.path())
        };
        let pool = Arc::new(BoundaryPool::new(&config, Arc::new(UnavailableBlockchain)));
        pool.initialize().await.unwrap();
        EnclaveService::new(pool)
    }

    #[tokio::test]
    async fn register_then_execute() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, 3).await;
        service
            .register_function("double", "function double(x){return x*2}")
            .await
            .unwrap();

        let result = service
            .execute_function(&ExecutionRequest::new("double", r#"{"x":21}"#))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output_json.as_deref(), Some("42"));
        assert_eq!(service.list_functions().await.unwrap(), vec!["double"]);
        service.pool().destroy().await;
    }

    #[tokio::test]
    async fn secrets_are_visible_from_every_instance() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, 3).await;
        service.store_secret("api-key", b"s3cr3t", "owner1").await.unwrap();

        for id in ["a", "b", "c", "d", "e", "f"] {
            let source = format!("function {id}() {{ return secrets.get('api-key').length; }}");
            service.register_function(id, &source).await.unwrap();
            let request = ExecutionRequest {
                caller_context: CallerContext {
                    caller: "owner1".into(),
                    ..CallerContext::default()
                },
                ..ExecutionRequest::new(id, "")
            };
            let result = service.execute_function(&request).await.unwrap();
            assert_eq!(result.output_json.as_deref(), Some("6"), "function {id}");
        }
        service.pool().destroy().await;
    }

    async fn holds_secret(bridge: &crate::bridge::EnclaveBridge, secret_id: &str) -> bool {
        // A delete by the owner reports whether the secret was present.
        let payload = DeleteSecretPayload {
            secret_id: secret_id.to_string(),
            owner: "owner1".to_string(),
        };
        match bridge.call(Opcode::DeleteSecret, &payload).await {
            Ok(value) => decode(value).unwrap(),
            Err(e) if e.kind == ErrorKind::NotFound => false,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn failed_secret_broadcast_leaves_no_partial_copies() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, 3).await;
        service.pool().bridges()[1].inject_panic().await.unwrap_err();

        let err = service
            .store_secret("api-key", b"s3cr3t", "owner1")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BoundaryUnavailable);

        let bridges = service.pool().bridges();
        assert!(!holds_secret(&bridges[0], "api-key").await);
        assert!(!holds_secret(&bridges[2], "api-key").await);
        service.pool().destroy().await;
    }

    #[tokio::test]
    async fn delete_reaches_instances_past_a_failure() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, 3).await;
        service.store_secret("api-key", b"s3cr3t", "owner1").await.unwrap();
        service.pool().bridges()[1].inject_panic().await.unwrap_err();

        let err = service.delete_secret("api-key", "owner1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BoundaryUnavailable);

        let bridges = service.pool().bridges();
        assert!(!holds_secret(&bridges[0], "api-key").await);
        assert!(!holds_secret(&bridges[2], "api-key").await);
        service.pool().destroy().await;
    }

    #[tokio::test]
    async fn handle_routes_tagged_requests() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, 1).await;

        let request: ServiceRequest = serde_json::from_value(serde_json::json!({
            "operation": "registerFunction",
            "functionId": "one",
            "source": "function one() { return 1; }",
        }))
        .unwrap();
        assert!(matches!(
            service.handle(request).await.unwrap(),
            ServiceResponse::RegisterFunction(info) if info.function_id == "one"
        ));

        let request: ServiceRequest = serde_json::from_value(serde_json::json!({
            "operation": "attest",
            "reportData": "bm9uY2U=",
        }))
        .unwrap();
        let ServiceResponse::Attest(report) = service.handle(request).await.unwrap() else {
            panic!("expected an attestation report");
        };
        assert_eq!(report.platform, "simulation");

        let request: ServiceRequest = serde_json::from_value(serde_json::json!({
            "operation": "executeFunction",
            "functionId": "missing",
        }))
        .unwrap();
        assert_eq!(
            service.handle(request).await.unwrap_err().kind,
            ErrorKind::NotFound
        );
        service.pool().destroy().await;
    }
}
