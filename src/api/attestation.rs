// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{body::Bytes, extract::State, Json};
use serde::Deserialize;

use crate::{
    bridge::{codec::base64_bytes, AttestationReport},
    error::ApiError,
    state::AppState,
};

/// Optional caller data (for example a nonce) bound into the report.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestRequest {
    #[serde(default, with = "base64_bytes")]
    pub report_data: Vec<u8>,
}

/// Reports expire at `validUntil`; callers re-attest after that. An empty
/// body attests without caller data.
pub async fn attest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AttestationReport>, ApiError> {
    let request = if body.is_empty() {
        AttestRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid attestation request: {e}")))?
    };
    let report = state.service.attest(&request.report_data).await?;
    Ok(Json(report))
}
