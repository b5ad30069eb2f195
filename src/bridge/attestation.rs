// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attestation reports.
//!
//! ## Platforms
//!
//! - **gramine**: caller report data is hashed into the 64-byte SGX
//!   `REPORTDATA` field through `/dev/attestation/user_report_data`, and the
//!   DCAP quote is read back from `/dev/attestation/quote`. MRENCLAVE sits at
//!   quote offset 112..144. Quote signatures are checked by an external DCAP
//!   verifier, not here.
//! - **simulation**: the quote is built and signed by the instance
//!   attestation key. It proves nothing about hardware and exists so the
//!   flow can be exercised end to end without SGX.
//!
//! Simulation quote layout:
//!
//! ```text
//! measurement (32) ‖ report data (64) ‖ generated_at ms (8, BE)
//!   ‖ valid_until ms (8, BE) ‖ ECDSA signature (64)
//! ```

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::config::Platform;
use crate::crypto::{sha256, verify, SigningKeyPair};
use crate::error::{EnclaveError, ErrorKind};

use super::codec::base64_bytes;

pub const GRAMINE_ATTESTATION_DIR: &str = "/dev/attestation";
pub const REPORT_DATA_LEN: usize = 64;
/// MRENCLAVE position inside an SGX DCAP quote.
pub const QUOTE_MEASUREMENT_RANGE: Range<usize> = 112..144;

const MEASUREMENT_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;
const SIMULATED_BODY_LEN: usize = MEASUREMENT_LEN + REPORT_DATA_LEN + 16;

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("attestation device not available: {0}")]
    DeviceMissing(String),

    #[error("attestation I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed quote: {0}")]
    MalformedQuote(String),

    #[error("report is outside its validity window")]
    Expired,

    #[error("quote does not match the report")]
    Mismatch,

    #[error("quote signature is invalid")]
    BadSignature,
}

impl AttestationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AttestationError::DeviceMissing(_) | AttestationError::Io(_) => {
                ErrorKind::BoundaryUnavailable
            }
            AttestationError::Expired => ErrorKind::InvalidArgument,
            AttestationError::MalformedQuote(_)
            | AttestationError::Mismatch
            | AttestationError::BadSignature => ErrorKind::IntegrityViolation,
        }
    }
}

impl From<AttestationError> for EnclaveError {
    fn from(err: AttestationError) -> Self {
        EnclaveError::new(err.kind(), err.to_string())
    }
}

/// A time-bounded statement of what code the boundary runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReport {
    pub platform: String,
    /// Lowercase hex.
    pub enclave_measurement_hash: String,
    #[serde(with = "base64_bytes")]
    pub quote_bytes: Vec<u8>,
    /// The 64-byte block bound into the quote.
    #[serde(with = "base64_bytes")]
    pub report_data: Vec<u8>,
    /// Simulation signer; empty on hardware platforms.
    #[serde(default, with = "base64_bytes")]
    pub public_key: Vec<u8>,
    pub generated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl AttestationReport {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.generated_at <= now && now <= self.valid_until
    }
}

/// Measurement of this build on `platform`.
pub fn measurement(platform: Platform) -> [u8; 32] {
    let mut input = Vec::new();
    input.extend_from_slice(env!("CARGO_PKG_NAME").as_bytes());
    input.push(0);
    input.extend_from_slice(env!("CARGO_PKG_VERSION").as_bytes());
    input.push(0);
    input.extend_from_slice(platform.as_str().as_bytes());
    sha256(&input)
}

/// SHA-512 of the caller's report data, sized for SGX `REPORTDATA`.
pub fn report_data_block(user_data: &[u8]) -> [u8; REPORT_DATA_LEN] {
    let mut block = [0u8; REPORT_DATA_LEN];
    block.copy_from_slice(&Sha512::digest(user_data));
    block
}

/// Fail with `DeviceMissing` when `platform` cannot attest from
/// `device_dir`.
pub fn probe_platform(platform: Platform, device_dir: &Path) -> Result<(), AttestationError> {
    match platform {
        Platform::Simulation => Ok(()),
        Platform::Gramine if device_dir.join("quote").exists() => Ok(()),
        Platform::Gramine => Err(AttestationError::DeviceMissing(
            device_dir.display().to_string(),
        )),
    }
}

/// Produces attestation reports for one boundary instance.
pub struct Attestor {
    platform: Platform,
    ttl: Duration,
    signer: SigningKeyPair,
    device_dir: PathBuf,
}

impl Attestor {
    pub fn new(platform: Platform, ttl: Duration, signer: SigningKeyPair) -> Self {
        Self {
            platform,
            ttl,
            signer,
            device_dir: PathBuf::from(GRAMINE_ATTESTATION_DIR),
        }
    }

    /// Read the attestation device from `dir` instead of `/dev/attestation`.
    pub fn with_device_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.device_dir = dir.into();
        self
    }

    pub fn signer(&self) -> &SigningKeyPair {
        &self.signer
    }

    pub fn probe(&self) -> Result<(), AttestationError> {
        probe_platform(self.platform, &self.device_dir)
    }

    pub fn generate(&self, user_data: &[u8]) -> Result<AttestationReport, AttestationError> {
        let report_data = report_data_block(user_data);
        let now_ms = Utc::now().timestamp_millis();
        let generated_at = from_millis(now_ms);
        let ttl = TimeDelta::try_milliseconds(self.ttl.as_millis() as i64)
            .unwrap_or_else(TimeDelta::zero);
        let valid_until = generated_at + ttl;

        let (measurement, quote_bytes, public_key) = match self.platform {
            Platform::Simulation => {
                let measurement = measurement(self.platform);
                let mut quote = Vec::with_capacity(SIMULATED_BODY_LEN + SIGNATURE_LEN);
                quote.extend_from_slice(&measurement);
                quote.extend_from_slice(&report_data);
                quote.extend_from_slice(&now_ms.to_be_bytes());
                quote.extend_from_slice(&valid_until.timestamp_millis().to_be_bytes());
                let signature = self.signer.sign(&quote);
                quote.extend_from_slice(&signature);
                (measurement.to_vec(), quote, self.signer.public_key())
            }
            Platform::Gramine => {
                self.probe()?;
                fs::write(self.device_dir.join("user_report_data"), report_data)?;
                let quote = fs::read(self.device_dir.join("quote"))?;
                let measurement = quote
                    .get(QUOTE_MEASUREMENT_RANGE)
                    .ok_or_else(|| {
                        AttestationError::MalformedQuote(format!("quote is {} bytes", quote.len()))
                    })?
                    .to_vec();
                (measurement, quote, Vec::new())
            }
        };

        tracing::info!(
            platform = %self.platform.as_str(),
            measurement = %hex::encode(&measurement),
            "Attestation report generated"
        );
        Ok(AttestationReport {
            platform: self.platform.as_str().to_string(),
            enclave_measurement_hash: hex::encode(measurement),
            quote_bytes,
            report_data: report_data.to_vec(),
            public_key,
            generated_at,
            valid_until,
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// Check a report's validity window and its binding to the quote. For
/// simulation reports the quote signature is verified as well.
pub fn verify_report(report: &AttestationReport, now: DateTime<Utc>) -> Result<(), AttestationError> {
    if !report.is_valid_at(now) {
        return Err(AttestationError::Expired);
    }
    let quote = &report.quote_bytes;

    if report.platform == Platform::Gramine.as_str() {
        let measurement = quote.get(QUOTE_MEASUREMENT_RANGE).ok_or_else(|| {
            AttestationError::MalformedQuote(format!("quote is {} bytes", quote.len()))
        })?;
        if hex::encode(measurement) != report.enclave_measurement_hash {
            return Err(AttestationError::Mismatch);
        }
        return Ok(());
    }

    if quote.len() != SIMULATED_BODY_LEN + SIGNATURE_LEN {
        return Err(AttestationError::MalformedQuote(format!(
            "simulated quote is {} bytes",
            quote.len()
        )));
    }
    let (body, signature) = quote.split_at(SIMULATED_BODY_LEN);
    let (measurement, rest) = body.split_at(MEASUREMENT_LEN);
    let (report_data, times) = rest.split_at(REPORT_DATA_LEN);
    let mut generated = [0u8; 8];
    let mut until = [0u8; 8];
    generated.copy_from_slice(&times[..8]);
    until.copy_from_slice(&times[8..]);

    if hex::encode(measurement) != report.enclave_measurement_hash
        || report_data != report.report_data.as_slice()
        || i64::from_be_bytes(generated) != report.generated_at.timestamp_millis()
        || i64::from_be_bytes(until) != report.valid_until.timestamp_millis()
    {
        return Err(AttestationError::Mismatch);
    }
    match verify(body, signature, &report.public_key) {
        Ok(true) => Ok(()),
        _ => Err(AttestationError::BadSignature),
    }
}
