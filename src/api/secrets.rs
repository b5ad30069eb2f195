// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{bridge::codec::base64_secret, error::ApiError, state::AppState};

/// `value` is base64. It is never echoed back or logged.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSecretRequest {
    pub secret_id: String,
    #[serde(with = "base64_secret")]
    pub value: Zeroizing<Vec<u8>>,
    pub owner: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSecretResponse {
    pub secret_id: String,
    pub stored: bool,
}

#[derive(Deserialize)]
pub struct OwnerQuery {
    pub owner: String,
}

pub async fn store_secret(
    State(state): State<AppState>,
    Json(request): Json<StoreSecretRequest>,
) -> Result<(StatusCode, Json<StoreSecretResponse>), ApiError> {
    let stored = state
        .service
        .store_secret(&request.secret_id, &request.value, &request.owner)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(StoreSecretResponse {
            secret_id: request.secret_id,
            stored,
        }),
    ))
}

pub async fn delete_secret(
    Path(secret_id): Path<String>,
    Query(query): Query<OwnerQuery>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_secret(&secret_id, &query.owner).await?;
    Ok(StatusCode::NO_CONTENT)
}
