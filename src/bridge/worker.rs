// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The bridge between the async host and one boundary instance.
//!
//! Each `EnclaveBridge` owns a dedicated OS thread running one
//! [`BoundaryInstance`]. Calls are queued FIFO on a bounded channel and
//! handled one at a time, so at most one call is inside the boundary.
//!
//! ## Failure model
//!
//! - Every job runs under `catch_unwind`. A panic is reported to its caller
//!   as an `Internal` error and poisons the instance: all later calls fail
//!   with `BoundaryUnavailable` until the bridge is destroyed and
//!   initialized again.
//! - `destroy()` closes the queue and lets queued calls drain for
//!   `shutdown_timeout`. Past that, the in-flight execution is cancelled,
//!   the rest of the queue is refused and a forced teardown is logged.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::blockchain::BlockchainClient;
use crate::config::EnclaveConfig;
use crate::error::{scrub_message, EnclaveError};

use super::attestation::AttestationReport;
use super::codec::{decode_frame, encode_request, AttestPayload, BridgeResponse};
use super::instance::BoundaryInstance;
use super::opcode::Opcode;

/// Pending calls per bridge before callers wait for queue space.
pub const QUEUE_DEPTH: usize = 256;

/// Stack of the worker thread. The script interpreter recurses.
const WORKER_STACK_BYTES: usize = 32 * 1024 * 1024;

enum Job {
    Initialize {
        reply: oneshot::Sender<Result<bool, EnclaveError>>,
    },
    Call {
        request: Zeroizing<Vec<u8>>,
        reply: oneshot::Sender<BridgeResponse>,
    },
    #[cfg(test)]
    Panic {
        reply: oneshot::Sender<Result<bool, EnclaveError>>,
    },
}

/// State shared between a bridge handle and one worker thread.
#[derive(Default)]
struct Shared {
    initialized: AtomicBool,
    poisoned: AtomicBool,
    /// Set on forced teardown: refuse whatever is still queued.
    aborting: AtomicBool,
    current: Mutex<Option<CancellationToken>>,
}

impl Shared {
    fn set_current(&self, token: Option<CancellationToken>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn cancel_current(&self) -> bool {
        match &*self.current.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run `f` unless the instance is poisoned, converting a panic into an
    /// error and poisoning the instance.
    fn guarded<T>(
        &self,
        index: usize,
        operation: &str,
        f: impl FnOnce() -> Result<T, EnclaveError>,
    ) -> Result<T, EnclaveError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(EnclaveError::boundary_unavailable(
                "boundary instance is poisoned by an earlier fault",
            ));
        }
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                self.poisoned.store(true, Ordering::Release);
                self.initialized.store(false, Ordering::Release);
                tracing::error!(
                    instance = index,
                    operation = %operation,
                    panic = %scrub_message(&panic_message(&payload), &[]),
                    "Boundary instance panicked, instance poisoned"
                );
                Err(EnclaveError::internal(format!("boundary fault during {operation}")))
            }
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Worker {
    sender: mpsc::Sender<Job>,
    done: oneshot::Receiver<()>,
    shared: Arc<Shared>,
}

pub struct EnclaveBridge {
    index: usize,
    config: EnclaveConfig,
    blockchain: Arc<dyn BlockchainClient>,
    worker: Mutex<Option<Worker>>,
}

impl EnclaveBridge {
    /// Does not start the worker. Call `initialize()` first.
    pub fn new(index: usize, config: EnclaveConfig, blockchain: Arc<dyn BlockchainClient>) -> Self {
        Self {
            index,
            config,
            blockchain,
            worker: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn shared(&self) -> Option<Arc<Shared>> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|worker| worker.shared.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.shared()
            .is_some_and(|shared| shared.initialized.load(Ordering::Acquire))
    }

    pub fn is_poisoned(&self) -> bool {
        self.shared()
            .is_some_and(|shared| shared.poisoned.load(Ordering::Acquire))
    }

    /// Start the worker if needed and load the instance. Idempotent.
    pub async fn initialize(&self) -> Result<bool, EnclaveError> {
        let sender = self.ensure_worker()?;
        let (reply, response) = oneshot::channel();
        sender
            .send(Job::Initialize { reply })
            .await
            .map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())?
    }

    fn ensure_worker(&self) -> Result<mpsc::Sender<Job>, EnclaveError> {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = slot.as_ref() {
            return Ok(worker.sender.clone());
        }

        let (sender, jobs) = mpsc::channel(QUEUE_DEPTH);
        let (done_tx, done) = oneshot::channel();
        let shared = Arc::new(Shared::default());
        let instance = BoundaryInstance::new(self.index, self.config.clone(), self.blockchain.clone());
        let max_payload = self.config.max_payload_bytes;
        let worker_shared = shared.clone();

        std::thread::Builder::new()
            .name(format!("boundary-{}", self.index))
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                run_worker(instance, jobs, &worker_shared, max_payload);
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                EnclaveError::boundary_unavailable(format!("failed to start boundary worker: {e}"))
            })?;

        *slot = Some(Worker {
            sender: sender.clone(),
            done,
            shared,
        });
        Ok(sender)
    }

    fn sender(&self) -> Result<mpsc::Sender<Job>, EnclaveError> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|worker| worker.sender.clone())
            .ok_or_else(|| EnclaveError::boundary_unavailable("boundary bridge is not initialized"))
    }

    /// Queue one request frame and wait for its response. The frame is
    /// wiped once the worker is done with it.
    pub async fn call_raw(&self, request: Zeroizing<Vec<u8>>) -> BridgeResponse {
        let result = async {
            let sender = self.sender()?;
            let (reply, response) = oneshot::channel();
            sender
                .send(Job::Call { request, reply })
                .await
                .map_err(|_| worker_gone())?;
            response.await.map_err(|_| worker_gone())
        }
        .await;
        match result {
            Ok(response) => response,
            Err(e) => BridgeResponse::failure(&e),
        }
    }

    /// Encode `payload` for `opcode`, call through the bridge and unwrap the
    /// response.
    pub async fn call<T: Serialize>(
        &self,
        opcode: Opcode,
        payload: &T,
    ) -> Result<serde_json::Value, EnclaveError> {
        let request = encode_request(opcode, payload)?;
        self.call_raw(request).await.into_result()
    }

    /// Fresh attestation report binding `report_data`.
    pub async fn attest(&self, report_data: &[u8]) -> Result<AttestationReport, EnclaveError> {
        let payload = AttestPayload {
            report_data: report_data.to_vec(),
        };
        let value = self.call(Opcode::Attest, &payload).await?;
        serde_json::from_value(value).map_err(|e| EnclaveError::internal(e.to_string()))
    }

    /// Cancel the execution currently inside the boundary, if any.
    pub fn cancel_current(&self) -> bool {
        self.shared().is_some_and(|shared| shared.cancel_current())
    }

    /// Drain and stop the worker. Returns `false` if it was not running.
    pub async fn destroy(&self) -> bool {
        let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };
        let Worker {
            sender,
            mut done,
            shared,
        } = worker;
        drop(sender);

        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, &mut done).await.is_err() {
            shared.aborting.store(true, Ordering::Release);
            shared.cancel_current();
            tracing::error!(
                instance = self.index,
                timeout_ms = timeout.as_millis() as u64,
                "Boundary drain timed out, forcing teardown"
            );
            if tokio::time::timeout(timeout, &mut done).await.is_err() {
                tracing::error!(
                    instance = self.index,
                    "Boundary worker did not stop after forced teardown, detaching"
                );
            }
        }
        tracing::info!(instance = self.index, "Boundary bridge destroyed");
        true
    }

    #[cfg(test)]
    pub(crate) async fn inject_panic(&self) -> Result<bool, EnclaveError> {
        let sender = self.sender()?;
        let (reply, response) = oneshot::channel();
        sender
            .send(Job::Panic { reply })
            .await
            .map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> EnclaveError {
    EnclaveError::boundary_unavailable("boundary worker stopped")
}

// =============================================================================
// Worker thread
// =============================================================================

fn run_worker(
    mut instance: BoundaryInstance,
    mut jobs: mpsc::Receiver<Job>,
    shared: &Shared,
    max_payload_bytes: usize,
) {
    let index = instance.index();
    tracing::debug!(instance = index, "Boundary worker started");

    while let Some(job) = jobs.blocking_recv() {
        match job {
            Job::Initialize { reply } => {
                let result = shared.guarded(index, "initialize", || instance.initialize());
                if result.is_ok() {
                    shared.initialized.store(true, Ordering::Release);
                }
                let _ = reply.send(result.map_err(|e| e.scrubbed(&[])));
            }
            Job::Call { request, reply } => {
                // Caller went away while queued.
                if reply.is_closed() {
                    continue;
                }
                let response = dispatch(&instance, shared, &request, max_payload_bytes);
                let _ = reply.send(response);
            }
            #[cfg(test)]
            Job::Panic { reply } => {
                let result = shared.guarded(index, "test", || -> Result<bool, EnclaveError> {
                    panic!("injected fault")
                });
                let _ = reply.send(result);
            }
        }
    }

    if shared.poisoned.load(Ordering::Acquire) {
        tracing::warn!(instance = index, "Dropping poisoned boundary instance");
    } else if let Err(payload) = catch_unwind(AssertUnwindSafe(|| instance.destroy())) {
        tracing::error!(
            instance = index,
            panic = %scrub_message(&panic_message(&payload), &[]),
            "Boundary instance panicked during teardown"
        );
    }
    shared.initialized.store(false, Ordering::Release);
    tracing::debug!(instance = index, "Boundary worker stopped");
}

fn dispatch(
    instance: &BoundaryInstance,
    shared: &Shared,
    request: &[u8],
    max_payload_bytes: usize,
) -> BridgeResponse {
    if shared.aborting.load(Ordering::Acquire) {
        return BridgeResponse::failure(&EnclaveError::boundary_unavailable(
            "boundary is shutting down",
        ));
    }
    let frame = match decode_frame(request, max_payload_bytes) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(instance = instance.index(), error = %e, "Rejected malformed bridge frame");
            return BridgeResponse::failure(&e);
        }
    };

    let started = Instant::now();
    let token = CancellationToken::new();
    shared.set_current(Some(token.clone()));
    let result = shared.guarded(instance.index(), frame.opcode.as_str(), || {
        instance.call(&frame, token)
    });
    shared.set_current(None);

    tracing::debug!(
        instance = instance.index(),
        opcode = %frame.opcode,
        ok = result.is_ok(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Bridge call completed"
    );
    BridgeResponse::from(result.map_err(|e| e.scrubbed(&[])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::UnavailableBlockchain;
    use crate::bridge::codec::{encode_frame, FunctionIdPayload, RegisterFunctionPayload};
    use crate::crypto::kdf::MIN_ITERATIONS;
    use crate::error::ErrorKind;
    use crate::sandbox::{ExecutionRequest, ExecutionResult};
    use std::time::Duration;
    use tempfile::TempDir;

    fn bridge(temp: &TempDir, shutdown_timeout_ms: u64) -> EnclaveBridge {
        let config = EnclaveConfig {
            kdf_iterations: MIN_ITERATIONS,
            shutdown_timeout_ms,
            ..EnclaveConfig::with_storage_path(temp.path())
        };
        EnclaveBridge::new(0, config, Arc::new(UnavailableBlockchain))
    }

    async fn register(bridge: &EnclaveBridge, id: &str, source: &str) {
        bridge
            .call(
                Opcode::RegisterFunction,
                &RegisterFunctionPayload {
                    function_id: id.into(),
                    source: source.into(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn calls_before_initialize_are_unavailable() {
        let temp = TempDir::new().unwrap();
        let bridge = bridge(&temp, 1_000);
        let err = bridge
            .call(Opcode::ListFunctions, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BoundaryUnavailable);
        assert!(!bridge.destroy().await);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let bridge = bridge(&temp, 1_000);
        assert!(bridge.initialize().await.unwrap());
        assert!(bridge.initialize().await.unwrap());
        assert!(bridge.is_initialized());
        assert!(bridge.destroy().await);
        assert!(!bridge.is_initialized());
    }

    #[tokio::test]
    async fn executes_through_the_queue() {
        let temp = TempDir::new().unwrap();
        let bridge = bridge(&temp, 1_000);
        bridge.initialize().await.unwrap();
        register(&bridge, "double", "function double(x){return x*2}").await;

        let value = bridge
            .call(
                Opcode::ExecuteFunction,
                &ExecutionRequest::new("double", r#"{"x":21}"#),
            )
            .await
            .unwrap();
        let result: ExecutionResult = serde_json::from_value(value).unwrap();
        assert!(result.success);
        assert_eq!(result.output_json.as_deref(), Some("42"));
        bridge.destroy().await;
    }

    #[tokio::test]
    async fn malformed_frames_fail_before_dispatch() {
        let temp = TempDir::new().unwrap();
        let bridge = bridge(&temp, 1_000);
        bridge.initialize().await.unwrap();

        let mut bad_magic = encode_frame(Opcode::ListFunctions, b"{}").unwrap();
        bad_magic[0] = b'X';
        let response = bridge.call_raw(bad_magic).await;
        assert_eq!(
            response.into_result().unwrap_err().kind,
            ErrorKind::InvalidPayload
        );

        let wrong_shape = encode_frame(Opcode::UnregisterFunction, b"[1,2]").unwrap();
        let response = bridge.call_raw(wrong_shape).await;
        assert_eq!(
            response.into_result().unwrap_err().kind,
            ErrorKind::InvalidPayload
        );
        bridge.destroy().await;
    }

    #[tokio::test]
    async fn panics_poison_the_instance() {
        let temp = TempDir::new().unwrap();
        let bridge = bridge(&temp, 1_000);
        bridge.initialize().await.unwrap();

        let err = bridge.inject_panic().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(bridge.is_poisoned());

        let err = bridge
            .call(
                Opcode::UnregisterFunction,
                &FunctionIdPayload {
                    function_id: "f".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BoundaryUnavailable);

        // A fresh worker recovers.
        assert!(bridge.destroy().await);
        bridge.initialize().await.unwrap();
        assert!(!bridge.is_poisoned());
        bridge
            .call(Opcode::ListFunctions, &serde_json::json!({}))
            .await
            .unwrap();
        bridge.destroy().await;
    }

    #[tokio::test]
    async fn cancel_current_stops_execution() {
        let temp = TempDir::new().unwrap();
        let bridge = Arc::new(bridge(&temp, 1_000));
        bridge.initialize().await.unwrap();
        register(&bridge, "spin", "function spin() { while (true) {} }").await;

        let running = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .call(Opcode::ExecuteFunction, &ExecutionRequest::new("spin", ""))
                    .await
            })
        };
        while !bridge.cancel_current() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let result: ExecutionResult =
            serde_json::from_value(running.await.unwrap().unwrap()).unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
        bridge.destroy().await;
    }

    #[tokio::test]
    async fn destroy_forces_teardown_after_timeout() {
        let temp = TempDir::new().unwrap();
        let bridge = Arc::new(bridge(&temp, 100));
        bridge.initialize().await.unwrap();
        register(&bridge, "spin", "function spin() { while (true) {} }").await;

        let running = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .call(Opcode::ExecuteFunction, &ExecutionRequest::new("spin", ""))
                    .await
            })
        };
        let queued = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                bridge.call(Opcode::ListFunctions, &serde_json::json!({})).await
            })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;

        let started = Instant::now();
        assert!(bridge.destroy().await);
        assert!(started.elapsed() < Duration::from_secs(5));

        let result: ExecutionResult =
            serde_json::from_value(running.await.unwrap().unwrap()).unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(
            queued.await.unwrap().unwrap_err().kind,
            ErrorKind::BoundaryUnavailable
        );
    }

    #[tokio::test]
    async fn attest_returns_a_verifiable_report() {
        let temp = TempDir::new().unwrap();
        let bridge = bridge(&temp, 1_000);
        bridge.initialize().await.unwrap();
        let report = bridge.attest(b"nonce").await.unwrap();
        crate::bridge::attestation::verify_report(&report, chrono::Utc::now()).unwrap();
        bridge.destroy().await;
    }
}
