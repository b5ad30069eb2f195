// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain access for script host callbacks.
//!
//! Scripts reach a chain only through `blockchain.*`, which the boundary
//! forwards to a [`BlockchainClient`]. Calls are synchronous and bounded by
//! the timeout the sandbox passes in.

use std::time::Duration;

use crate::error::{EnclaveError, ErrorKind};

pub mod rpc;
pub mod types;

pub use rpc::{EvmRpcClient, RpcError};
pub use types::ContractCall;

/// Synchronous chain queries used by script callbacks.
pub trait BlockchainClient: Send + Sync {
    /// Native balance of `address` in the chain's smallest unit, as a
    /// decimal string.
    fn get_balance(&self, address: &str, timeout: Duration) -> Result<String, EnclaveError>;

    /// Read-only contract call. Returns the raw return data.
    fn call_contract(
        &self,
        call: &ContractCall,
        timeout: Duration,
    ) -> Result<serde_json::Value, EnclaveError>;

    /// Storage slot of `address` as a 0x-prefixed 32-byte hex word.
    fn get_storage(&self, address: &str, slot: &str, timeout: Duration)
        -> Result<String, EnclaveError>;
}

/// Client used when no RPC endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBlockchain;

impl UnavailableBlockchain {
    fn unavailable() -> EnclaveError {
        EnclaveError::new(
            ErrorKind::BlockchainUnavailable,
            "no blockchain endpoint is configured",
        )
    }
}

impl BlockchainClient for UnavailableBlockchain {
    fn get_balance(&self, _address: &str, _timeout: Duration) -> Result<String, EnclaveError> {
        Err(Self::unavailable())
    }

    fn call_contract(
        &self,
        _call: &ContractCall,
        _timeout: Duration,
    ) -> Result<serde_json::Value, EnclaveError> {
        Err(Self::unavailable())
    }

    fn get_storage(
        &self,
        _address: &str,
        _slot: &str,
        _timeout: Duration,
    ) -> Result<String, EnclaveError> {
        Err(Self::unavailable())
    }
}
