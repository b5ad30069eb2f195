// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Static startup configuration for the boundary host. Values are read from
//! the environment once at startup and validated before any boundary
//! instance is created.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ENCLAVE_STORAGE_PATH` | Root directory for sealed storage | `/data` |
//! | `ENCLAVE_MAX_SCRIPT_MEMORY_MB` | Script heap ceiling | `64` |
//! | `ENCLAVE_MAX_SCRIPT_TIME_MS` | Script wall-clock ceiling | `30000` |
//! | `ENCLAVE_CHUNK_SIZE_BYTES` | Default chunk size (`0` = 1 MiB) | `1048576` |
//! | `ENCLAVE_KDF_ITERATIONS` | PBKDF2 iterations for sealing keys (≥ 100000) | `100000` |
//! | `ENCLAVE_INSTANCE_COUNT` | Boundary instances in the pool | `1` |
//! | `ENCLAVE_MAX_OUTPUT_BYTES` | Script output ceiling | `1048576` |
//! | `ENCLAVE_MAX_SOURCE_BYTES` | Script source ceiling | `1048576` |
//! | `ENCLAVE_MAX_PAYLOAD_BYTES` | Bridge payload ceiling | `16777216` |
//! | `ENCLAVE_HOST_CALL_TIMEOUT_MS` | Per host-callback timeout | `5000` |
//! | `ENCLAVE_SHUTDOWN_TIMEOUT_MS` | Graceful drain window on destroy | `5000` |
//! | `ENCLAVE_ATTESTATION_TTL_SECS` | Attestation report lifetime | `3600` |
//! | `ENCLAVE_PLATFORM` | `simulation` or `gramine` | `simulation` |
//! | `ENCLAVE_RPC_URL` | EVM JSON-RPC endpoint for `blockchain.*` | unset |
//! | `HOST` | HTTP bind address | `0.0.0.0` |
//! | `PORT` | HTTP bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::kdf::RECOMMENDED_ITERATIONS;
use crate::error::{EnclaveError, ErrorKind};
use crate::storage::paths::DATA_ROOT;

pub const STORAGE_PATH_ENV: &str = "ENCLAVE_STORAGE_PATH";
pub const MAX_SCRIPT_MEMORY_MB_ENV: &str = "ENCLAVE_MAX_SCRIPT_MEMORY_MB";
pub const MAX_SCRIPT_TIME_MS_ENV: &str = "ENCLAVE_MAX_SCRIPT_TIME_MS";
pub const CHUNK_SIZE_BYTES_ENV: &str = "ENCLAVE_CHUNK_SIZE_BYTES";
pub const KDF_ITERATIONS_ENV: &str = "ENCLAVE_KDF_ITERATIONS";
pub const INSTANCE_COUNT_ENV: &str = "ENCLAVE_INSTANCE_COUNT";
pub const MAX_OUTPUT_BYTES_ENV: &str = "ENCLAVE_MAX_OUTPUT_BYTES";
pub const MAX_SOURCE_BYTES_ENV: &str = "ENCLAVE_MAX_SOURCE_BYTES";
pub const MAX_PAYLOAD_BYTES_ENV: &str = "ENCLAVE_MAX_PAYLOAD_BYTES";
pub const HOST_CALL_TIMEOUT_MS_ENV: &str = "ENCLAVE_HOST_CALL_TIMEOUT_MS";
pub const SHUTDOWN_TIMEOUT_MS_ENV: &str = "ENCLAVE_SHUTDOWN_TIMEOUT_MS";
pub const ATTESTATION_TTL_SECS_ENV: &str = "ENCLAVE_ATTESTATION_TTL_SECS";
pub const PLATFORM_ENV: &str = "ENCLAVE_PLATFORM";
pub const RPC_URL_ENV: &str = "ENCLAVE_RPC_URL";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Chunk size used when a store or request asks for `0`.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest allowed pool.
pub const MAX_INSTANCE_COUNT: usize = 64;

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse `{value}`")]
    Parse { var: &'static str, value: String },

    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{var}: {value} iterations is below the minimum of {min}")]
    WeakKdf {
        var: &'static str,
        value: u32,
        min: u32,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::WeakKdf { .. } => ErrorKind::WeakParameters,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

impl From<ConfigError> for EnclaveError {
    fn from(err: ConfigError) -> Self {
        EnclaveError::new(err.kind(), err.to_string())
    }
}

/// Which trust-boundary backend a boundary instance runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Software boundary for development and tests.
    Simulation,
    /// SGX enclave under Gramine (`/dev/attestation`).
    Gramine,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Simulation => "simulation",
            Platform::Gramine => "gramine",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulation" | "sim" => Ok(Platform::Simulation),
            "gramine" | "sgx" => Ok(Platform::Gramine),
            other => Err(format!("unknown platform `{other}`")),
        }
    }
}

/// Boundary configuration shared by every instance in the pool.
#[derive(Debug, Clone)]
pub struct EnclaveConfig {
    pub storage_path: PathBuf,
    pub max_script_memory_mb: u64,
    pub max_script_time_ms: u64,
    pub chunk_size_bytes: usize,
    pub kdf_iterations: u32,
    pub instance_count: usize,
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,
    pub max_payload_bytes: usize,
    pub host_call_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub attestation_ttl_secs: u64,
    pub platform: Platform,
    pub rpc_url: Option<String>,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(DATA_ROOT),
            max_script_memory_mb: 64,
            max_script_time_ms: 30_000,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            kdf_iterations: RECOMMENDED_ITERATIONS,
            instance_count: 1,
            max_output_bytes: 1024 * 1024,
            max_source_bytes: 1024 * 1024,
            max_payload_bytes: 16 * 1024 * 1024,
            host_call_timeout_ms: 5_000,
            shutdown_timeout_ms: 5_000,
            attestation_ttl_secs: 3_600,
            platform: Platform::Simulation,
            rpc_url: None,
        }
    }
}

impl EnclaveConfig {
    /// Defaults rooted at `storage_path`, mostly for tests.
    pub fn with_storage_path(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            storage_path: lookup(STORAGE_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            max_script_memory_mb: parse_var(
                &lookup,
                MAX_SCRIPT_MEMORY_MB_ENV,
                defaults.max_script_memory_mb,
            )?,
            max_script_time_ms: parse_var(
                &lookup,
                MAX_SCRIPT_TIME_MS_ENV,
                defaults.max_script_time_ms,
            )?,
            chunk_size_bytes: parse_var(&lookup, CHUNK_SIZE_BYTES_ENV, defaults.chunk_size_bytes)?,
            kdf_iterations: parse_var(&lookup, KDF_ITERATIONS_ENV, defaults.kdf_iterations)?,
            instance_count: parse_var(&lookup, INSTANCE_COUNT_ENV, defaults.instance_count)?,
            max_output_bytes: parse_var(&lookup, MAX_OUTPUT_BYTES_ENV, defaults.max_output_bytes)?,
            max_source_bytes: parse_var(&lookup, MAX_SOURCE_BYTES_ENV, defaults.max_source_bytes)?,
            max_payload_bytes: parse_var(
                &lookup,
                MAX_PAYLOAD_BYTES_ENV,
                defaults.max_payload_bytes,
            )?,
            host_call_timeout_ms: parse_var(
                &lookup,
                HOST_CALL_TIMEOUT_MS_ENV,
                defaults.host_call_timeout_ms,
            )?,
            shutdown_timeout_ms: parse_var(
                &lookup,
                SHUTDOWN_TIMEOUT_MS_ENV,
                defaults.shutdown_timeout_ms,
            )?,
            attestation_ttl_secs: parse_var(
                &lookup,
                ATTESTATION_TTL_SECS_ENV,
                defaults.attestation_ttl_secs,
            )?,
            platform: match lookup(PLATFORM_ENV) {
                Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                    var: PLATFORM_ENV,
                    reason,
                })?,
                None => defaults.platform,
            },
            rpc_url: lookup(RPC_URL_ENV).filter(|s| !s.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges. A zero chunk size is legal and means
    /// [`DEFAULT_CHUNK_SIZE`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_path.as_os_str().is_empty() {
            return Err(invalid(STORAGE_PATH_ENV, "must not be empty"));
        }
        if !(1..=4096).contains(&self.max_script_memory_mb) {
            return Err(invalid(MAX_SCRIPT_MEMORY_MB_ENV, "must be within 1..=4096"));
        }
        if !(1..=600_000).contains(&self.max_script_time_ms) {
            return Err(invalid(MAX_SCRIPT_TIME_MS_ENV, "must be within 1..=600000"));
        }
        if self.kdf_iterations < RECOMMENDED_ITERATIONS {
            return Err(ConfigError::WeakKdf {
                var: KDF_ITERATIONS_ENV,
                value: self.kdf_iterations,
                min: RECOMMENDED_ITERATIONS,
            });
        }
        if !(1..=MAX_INSTANCE_COUNT).contains(&self.instance_count) {
            return Err(invalid(INSTANCE_COUNT_ENV, "must be within 1..=64"));
        }
        for (var, value) in [
            (MAX_OUTPUT_BYTES_ENV, self.max_output_bytes as u64),
            (MAX_SOURCE_BYTES_ENV, self.max_source_bytes as u64),
            (MAX_PAYLOAD_BYTES_ENV, self.max_payload_bytes as u64),
            (HOST_CALL_TIMEOUT_MS_ENV, self.host_call_timeout_ms),
            (SHUTDOWN_TIMEOUT_MS_ENV, self.shutdown_timeout_ms),
            (ATTESTATION_TTL_SECS_ENV, self.attestation_ttl_secs),
        ] {
            if value == 0 {
                return Err(invalid(var, "must be greater than zero"));
            }
        }
        if let Some(rpc_url) = &self.rpc_url {
            url::Url::parse(rpc_url).map_err(|e| invalid(RPC_URL_ENV, &e.to_string()))?;
        }
        Ok(())
    }

    /// Chunk size with `0` resolved to the default.
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size_bytes == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size_bytes
        }
    }

    pub fn max_script_memory_bytes(&self) -> usize {
        (self.max_script_memory_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn max_script_time(&self) -> Duration {
        Duration::from_millis(self.max_script_time_ms)
    }

    pub fn host_call_timeout(&self) -> Duration {
        Duration::from_millis(self.host_call_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn attestation_ttl(&self) -> Duration {
        Duration::from_secs(self.attestation_ttl_secs)
    }

    /// Storage root for instance `index` of the pool.
    pub fn instance_storage_path(&self, index: usize) -> PathBuf {
        self.storage_path.join(format!("instance-{index}"))
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Parse { var, value: raw }),
        None => Ok(default),
    }
}

fn invalid(var: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}
