// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM JSON-RPC client for script callbacks.
//!
//! The provider is async; callbacks arrive on the bridge worker thread,
//! which is not a runtime thread, so each query is driven to completion on
//! the host runtime through its [`Handle`] under a timeout.

use std::future::Future;
use std::time::Duration;

use alloy::{
    network::Ethereum,
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::{TransactionInput, TransactionRequest},
};
use tokio::runtime::Handle;

use crate::error::{EnclaveError, ErrorKind};

use super::types::{parse_address, parse_slot, ContractCall};
use super::BlockchainClient;

/// HTTP provider type (with the recommended fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Errors from chain queries.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid storage slot: {0}")]
    InvalidSlot(String),

    #[error("Invalid calldata: {0}")]
    InvalidCalldata(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    #[error("blocking RPC call issued from an async task")]
    AsyncContext,
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::InvalidAddress(_)
            | RpcError::InvalidSlot(_)
            | RpcError::InvalidCalldata(_) => ErrorKind::InvalidArgument,
            RpcError::InvalidRpcUrl(_)
            | RpcError::Rpc(_)
            | RpcError::Timeout(_)
            | RpcError::AsyncContext => ErrorKind::BlockchainUnavailable,
        }
    }
}

impl From<RpcError> for EnclaveError {
    fn from(err: RpcError) -> Self {
        EnclaveError::new(err.kind(), err.to_string())
    }
}

/// JSON-RPC client for one EVM endpoint.
pub struct EvmRpcClient {
    provider: HttpProvider,
    runtime: Handle,
    endpoint: String,
}

impl EvmRpcClient {
    pub fn new(rpc_url: &str, runtime: Handle) -> Result<Self, RpcError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| RpcError::InvalidRpcUrl(e.to_string()))?;
        let endpoint = url.host_str().unwrap_or("unknown").to_string();
        let provider = ProviderBuilder::new().connect_http(url);
        tracing::info!(endpoint = %endpoint, "Blockchain RPC client configured");
        Ok(Self {
            provider,
            runtime,
            endpoint,
        })
    }

    /// Endpoint host, for diagnostics.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn block_on<T, F>(&self, timeout: Duration, fut: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, RpcError>>,
    {
        // Handle::block_on panics on a runtime thread.
        if Handle::try_current().is_ok() {
            return Err(RpcError::AsyncContext);
        }
        self.runtime.block_on(async {
            tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| RpcError::Timeout(timeout))?
        })
    }
}

impl BlockchainClient for EvmRpcClient {
    fn get_balance(&self, address: &str, timeout: Duration) -> Result<String, EnclaveError> {
        let address = parse_address(address)?;
        let balance = self.block_on(timeout, async {
            self.provider
                .get_balance(address)
                .await
                .map_err(|e| RpcError::Rpc(e.to_string()))
        })?;
        Ok(balance.to_string())
    }

    fn call_contract(
        &self,
        call: &ContractCall,
        timeout: Duration,
    ) -> Result<serde_json::Value, EnclaveError> {
        let to = parse_address(&call.address)?;
        let tx = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(call.calldata()?));
        let output = self.block_on(timeout, async {
            self.provider
                .call(tx)
                .await
                .map_err(|e| RpcError::Rpc(e.to_string()))
        })?;
        Ok(serde_json::Value::String(format!("0x{}", hex::encode(output))))
    }

    fn get_storage(
        &self,
        address: &str,
        slot: &str,
        timeout: Duration,
    ) -> Result<String, EnclaveError> {
        let address = parse_address(address)?;
        let slot = parse_slot(slot)?;
        let word = self.block_on(timeout, async {
            self.provider
                .get_storage_at(address, slot)
                .await
                .map_err(|e| RpcError::Rpc(e.to_string()))
        })?;
        Ok(format!("0x{}", hex::encode(word.to_be_bytes::<32>())))
    }
}
