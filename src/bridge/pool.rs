// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! A fixed set of isolated boundary instances.
//!
//! Instances share nothing. Function operations go to the instance picked
//! by a stable hash of the function id, so a function always lives where it
//! was registered. Secrets are written to every instance because any of
//! them may run a function that reads them. Attestation uses instance 0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blockchain::BlockchainClient;
use crate::config::{EnclaveConfig, Platform};
use crate::crypto::sha256;
use crate::error::EnclaveError;

use super::worker::EnclaveBridge;

pub struct BoundaryPool {
    bridges: Vec<EnclaveBridge>,
    platform: Platform,
    warned_unsealed: AtomicBool,
}

impl BoundaryPool {
    /// One bridge per configured instance. Nothing starts until
    /// `initialize()`.
    pub fn new(config: &EnclaveConfig, blockchain: Arc<dyn BlockchainClient>) -> Self {
        let count = config.instance_count.max(1);
        let bridges = (0..count)
            .map(|index| EnclaveBridge::new(index, config.clone(), blockchain.clone()))
            .collect();
        Self {
            bridges,
            platform: config.platform,
            warned_unsealed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn bridges(&self) -> &[EnclaveBridge] {
        &self.bridges
    }

    /// Instance 0. Used for attestation and pool-wide queries.
    pub fn primary(&self) -> &EnclaveBridge {
        &self.bridges[0]
    }

    /// The bridge owning `function_id`.
    pub fn route(&self, function_id: &str) -> &EnclaveBridge {
        &self.bridges[route_index(function_id, self.bridges.len())]
    }

    /// Initialize every instance. Stops at the first failure.
    pub async fn initialize(&self) -> Result<bool, EnclaveError> {
        for bridge in &self.bridges {
            if let Err(e) = bridge.initialize().await {
                tracing::error!(
                    instance = bridge.index(),
                    error_kind = %e.kind,
                    error = %e,
                    "Boundary instance failed to initialize"
                );
                return Err(e);
            }
        }
        tracing::info!(instances = self.bridges.len(), "Boundary pool initialized");
        if self.platform == Platform::Simulation
            && !self.warned_unsealed.swap(true, Ordering::Relaxed)
        {
            tracing::warn!(
                platform = %self.platform.as_str(),
                "Simulation mode: master secrets are stored in plaintext beside the sealed store, do not use in production"
            );
        }
        Ok(true)
    }

    /// Destroy every instance. Returns `true` if any was running.
    pub async fn destroy(&self) -> bool {
        let mut any = false;
        for bridge in &self.bridges {
            any |= bridge.destroy().await;
        }
        any
    }

    /// Ready when every instance is initialized and none is poisoned.
    pub fn is_ready(&self) -> bool {
        self.bridges
            .iter()
            .all(|bridge| bridge.is_initialized() && !bridge.is_poisoned())
    }
}

/// Stable across processes and releases, unlike `DefaultHasher`.
pub fn route_index(function_id: &str, instances: usize) -> usize {
    if instances <= 1 {
        return 0;
    }
    let digest = sha256(function_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % instances as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::UnavailableBlockchain;
    use crate::crypto::kdf::MIN_ITERATIONS;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn simulation_mode_is_announced_once() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let temp = TempDir::new().unwrap();
        let config = EnclaveConfig {
            kdf_iterations: MIN_ITERATIONS,
            ..EnclaveConfig::with_storage_path(temp.path())
        };
        let pool = BoundaryPool::new(&config, Arc::new(UnavailableBlockchain));
        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();
        pool.destroy().await;

        assert_eq!(logs.text().matches("Simulation mode").count(), 1);
    }

    #[test]
    fn routing_is_stable_and_in_range() {
        for id in ["a", "double", "price-feed", "x".repeat(100).as_str()] {
            let first = route_index(id, 4);
            assert!(first < 4);
            assert_eq!(route_index(id, 4), first);
            assert_eq!(route_index(id, 1), 0);
        }
        let spread: std::collections::HashSet<usize> =
            (0..64).map(|i| route_index(&format!("fn-{i}"), 4)).collect();
        assert!(spread.len() > 1);
    }

    #[tokio::test]
    async fn instances_get_separate_directories() {
        let temp = TempDir::new().unwrap();
        let config = EnclaveConfig {
            kdf_iterations: MIN_ITERATIONS,
            instance_count: 2,
            ..EnclaveConfig::with_storage_path(temp.path())
        };
        let pool = BoundaryPool::new(&config, Arc::new(UnavailableBlockchain));
        assert_eq!(pool.len(), 2);
        assert!(!pool.is_ready());

        pool.initialize().await.unwrap();
        assert!(pool.is_ready());
        assert!(temp.path().join("instance-0").is_dir());
        assert!(temp.path().join("instance-1").is_dir());

        assert!(pool.destroy().await);
        assert!(!pool.is_ready());
    }
}
