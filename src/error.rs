// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Error Taxonomy
//!
//! Every component has its own `thiserror` enum. They all map onto a flat
//! [`ErrorKind`], which is the only thing that crosses the trust boundary
//! (together with a scrubbed message, see [`EnclaveError::scrubbed`]).
//!
//! ## Propagation Policy
//!
//! - `IntegrityViolation` and `CorruptManifest` are fatal to the operation
//!   and never downgraded to an empty result.
//! - `StorageUnavailable` and `BoundaryUnavailable` are degraded-health
//!   signals; only these are eligible for bounded retry.
//! - Everything else is returned to the caller as-is.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Placeholder written over scrubbed material.
pub const REDACTED: &str = "[redacted]";

/// Longest message allowed to leave the boundary.
pub const MAX_MESSAGE_LEN: usize = 512;

// =============================================================================
// Error Kinds
// =============================================================================

/// Error kinds understood by every caller of the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    DuplicateFunction,
    IntegrityViolation,
    CorruptManifest,
    TransactionAlreadyActive,
    CommitFailed,
    StorageUnavailable,
    BoundaryUnavailable,
    InvalidPayload,
    Timeout,
    ScriptError,
    RequirementFailed,
    BlockchainUnavailable,
    WeakParameters,
    RangeError,
    ResourceLimitExceeded,
    PermissionDenied,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::DuplicateFunction => "DuplicateFunction",
            ErrorKind::IntegrityViolation => "IntegrityViolation",
            ErrorKind::CorruptManifest => "CorruptManifest",
            ErrorKind::TransactionAlreadyActive => "TransactionAlreadyActive",
            ErrorKind::CommitFailed => "CommitFailed",
            ErrorKind::StorageUnavailable => "StorageUnavailable",
            ErrorKind::BoundaryUnavailable => "BoundaryUnavailable",
            ErrorKind::InvalidPayload => "InvalidPayload",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ScriptError => "ScriptError",
            ErrorKind::RequirementFailed => "RequirementFailed",
            ErrorKind::BlockchainUnavailable => "BlockchainUnavailable",
            ErrorKind::WeakParameters => "WeakParameters",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ResourceLimitExceeded => "ResourceLimitExceeded",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Transient I/O conditions. Integrity failures are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::StorageUnavailable | ErrorKind::BoundaryUnavailable
        )
    }

    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::IntegrityViolation | ErrorKind::CorruptManifest
        )
    }

    /// HTTP status used by the host API.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidArgument
            | ErrorKind::InvalidPayload
            | ErrorKind::WeakParameters
            | ErrorKind::RangeError => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::DuplicateFunction | ErrorKind::TransactionAlreadyActive => {
                StatusCode::CONFLICT
            }
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::ScriptError | ErrorKind::RequirementFailed => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::ResourceLimitExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::BlockchainUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::StorageUnavailable
            | ErrorKind::BoundaryUnavailable
            | ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::IntegrityViolation
            | ErrorKind::CorruptManifest
            | ErrorKind::CommitFailed
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Structured Boundary Error
// =============================================================================

/// Structured `{errorKind, message}` error returned across the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EnclaveError {
    #[serde(rename = "errorKind")]
    pub kind: ErrorKind,
    pub message: String,
}

impl EnclaveError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPayload, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn boundary_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BoundaryUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Copy of this error that is safe to hand to the host.
    ///
    /// Each entry of `sensitive` is replaced with [`REDACTED`], anything
    /// after the first line break is dropped and the result is capped at
    /// [`MAX_MESSAGE_LEN`] bytes.
    pub fn scrubbed(&self, sensitive: &[&str]) -> Self {
        Self {
            kind: self.kind,
            message: scrub_message(&self.message, sensitive),
        }
    }
}

/// Remove sensitive fragments and multi-line traces from a message.
pub fn scrub_message(message: &str, sensitive: &[&str]) -> String {
    let mut out = message.lines().next().unwrap_or_default().to_string();
    for fragment in sensitive {
        if !fragment.is_empty() && out.contains(fragment) {
            out = out.replace(fragment, REDACTED);
        }
    }
    if out.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

// =============================================================================
// HTTP Error
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub kind: Option<ErrorKind>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(rename = "errorKind", skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl From<EnclaveError> for ApiError {
    fn from(err: EnclaveError) -> Self {
        Self {
            status: err.kind.status_code(),
            message: err.message,
            kind: Some(err.kind),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_kind: self.kind,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn only_unavailability_is_transient() {
        assert!(ErrorKind::StorageUnavailable.is_transient());
        assert!(ErrorKind::BoundaryUnavailable.is_transient());
        assert!(!ErrorKind::IntegrityViolation.is_transient());
        assert!(!ErrorKind::CorruptManifest.is_transient());
        assert!(!ErrorKind::Timeout.is_transient());
    }

    #[test]
    fn enclave_error_serializes_as_kind_and_message() {
        let err = EnclaveError::new(ErrorKind::DuplicateFunction, "double already registered");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["errorKind"], "DuplicateFunction");
        assert_eq!(json["message"], "double already registered");

        let back: EnclaveError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn scrub_replaces_secrets_and_drops_traces() {
        let err = EnclaveError::new(
            ErrorKind::ScriptError,
            "uncaught: token s3cr3t rejected\n    at main (line 3)\n    at <top>",
        );
        let clean = err.scrubbed(&["s3cr3t"]);
        assert_eq!(clean.kind, ErrorKind::ScriptError);
        assert_eq!(clean.message, "uncaught: token [redacted] rejected");
    }

    #[test]
    fn scrub_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let out = scrub_message(&long, &[]);
        assert!(out.len() <= MAX_MESSAGE_LEN);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn status_codes_follow_kind() {
        let api: ApiError = EnclaveError::not_found("missing").into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);
        let api: ApiError = EnclaveError::new(ErrorKind::Timeout, "slow").into();
        assert_eq!(api.status, StatusCode::GATEWAY_TIMEOUT);
        let api: ApiError = EnclaveError::new(ErrorKind::DuplicateFunction, "dup").into();
        assert_eq!(api.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::from(EnclaveError::invalid_argument("bad data")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data","errorKind":"InvalidArgument"}"#);
    }

    #[tokio::test]
    async fn plain_api_error_omits_kind() {
        let response = ApiError::bad_request("bad").into_response();
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body_bytes[..], br#"{"error":"bad"}"#);
    }
}
