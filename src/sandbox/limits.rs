// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Resource limits for one script execution.
//!
//! Limits are enforced by the interpreter itself: the deadline and the
//! cancellation token are checked at every loop iteration, call and host
//! callback. The memory budget bounds live memory: allocations are charged
//! and credited back once the script can no longer reach them.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::EnclaveConfig;
use crate::error::{EnclaveError, ErrorKind};

/// Maximum nesting of script function calls.
pub const MAX_CALL_DEPTH: usize = 200;

/// Maximum number of log entries kept per execution.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Maximum size of one log entry.
pub const MAX_LOG_ENTRY_BYTES: usize = 4 * 1024;

/// Maximum source line length accepted by validation.
pub const MAX_LINE_LENGTH: usize = 1000;

/// Boundary-wide sandbox ceilings taken from configuration.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub max_memory_bytes: usize,
    pub max_time: Duration,
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,
    pub host_call_timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from_config(&EnclaveConfig::default())
    }
}

impl SandboxLimits {
    pub fn from_config(config: &EnclaveConfig) -> Self {
        Self {
            max_memory_bytes: config.max_script_memory_bytes(),
            max_time: config.max_script_time(),
            max_output_bytes: config.max_output_bytes,
            max_source_bytes: config.max_source_bytes,
            host_call_timeout: config.host_call_timeout(),
        }
    }

    /// Effective limits for one request: the tighter of the request and the
    /// boundary ceiling. Zero in the request means "use the ceiling".
    pub fn for_request(&self, timeout_ms: u64, max_output_bytes: usize) -> ExecutionLimits {
        let timeout = match timeout_ms {
            0 => self.max_time,
            ms => Duration::from_millis(ms).min(self.max_time),
        };
        let max_output_bytes = match max_output_bytes {
            0 => self.max_output_bytes,
            n => n.min(self.max_output_bytes),
        };
        ExecutionLimits {
            timeout,
            max_memory_bytes: self.max_memory_bytes,
            max_output_bytes,
            host_call_timeout: self.host_call_timeout,
        }
    }
}

/// Limits applied to a single execution.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub max_memory_bytes: usize,
    pub max_output_bytes: usize,
    pub host_call_timeout: Duration,
}

/// Reasons an execution stops that script code cannot catch.
#[derive(Debug, Clone)]
pub enum Abort {
    Timeout,
    Cancelled,
    ResourceLimit(String),
    RequirementFailed(String),
    /// A host callback (secrets, blockchain) failed.
    Host(EnclaveError),
}

impl Abort {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Abort::Timeout => ErrorKind::Timeout,
            Abort::Cancelled => ErrorKind::Cancelled,
            Abort::ResourceLimit(_) => ErrorKind::ResourceLimitExceeded,
            Abort::RequirementFailed(_) => ErrorKind::RequirementFailed,
            Abort::Host(e) => e.kind,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Abort::Timeout => "execution timed out".to_string(),
            Abort::Cancelled => "execution cancelled".to_string(),
            Abort::ResourceLimit(what) => format!("resource limit exceeded: {what}"),
            Abort::RequirementFailed(msg) => format!("requirement failed: {msg}"),
            Abort::Host(e) => e.message.clone(),
        }
    }
}

/// Running account of one execution's time and memory.
#[derive(Debug)]
pub struct Budget {
    started: Instant,
    deadline: Instant,
    cancel: CancellationToken,
    memory_used: usize,
    memory_limit: usize,
    host_call_timeout: Duration,
}

impl Budget {
    pub fn new(limits: &ExecutionLimits, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + limits.timeout,
            cancel,
            memory_used: 0,
            memory_limit: limits.max_memory_bytes,
            host_call_timeout: limits.host_call_timeout,
        }
    }

    /// Safe point: stop if cancelled or past the deadline.
    pub fn checkpoint(&self) -> Result<(), Abort> {
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(Abort::Timeout);
        }
        Ok(())
    }

    /// Account for `bytes` of live script allocation. Nothing is added when
    /// the ceiling would be crossed.
    pub fn charge(&mut self, bytes: usize) -> Result<(), Abort> {
        self.reserve(bytes)?;
        self.memory_used += bytes;
        Ok(())
    }

    /// Check that `bytes` of short-lived working memory fit beside what is
    /// live, without keeping them on the account.
    pub fn reserve(&self, bytes: usize) -> Result<(), Abort> {
        if self.memory_used.saturating_add(bytes) > self.memory_limit {
            return Err(Abort::ResourceLimit(format!(
                "live memory ceiling of {} bytes",
                self.memory_limit
            )));
        }
        Ok(())
    }

    /// Credit memory the script can no longer reach.
    pub fn release(&mut self, bytes: usize) {
        self.memory_used = self.memory_used.saturating_sub(bytes);
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Deadline for one host callback, nested inside the execution deadline.
    pub fn host_call_deadline(&self) -> (Duration, Instant) {
        let timeout = self.host_call_timeout.min(self.remaining());
        (timeout, Instant::now() + timeout)
    }
}
