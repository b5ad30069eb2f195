// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    bridge::FunctionInfo,
    error::ApiError,
    sandbox::{CallerContext, ExecutionRequest, ExecutionResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFunctionRequest {
    pub function_id: String,
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionList {
    pub functions: Vec<String>,
}

/// Body of `POST /v1/functions/{id}/execute`. Parameters may be given as a
/// JSON value or as an already-encoded JSON string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteFunctionRequest {
    pub parameters: Option<serde_json::Value>,
    pub parameters_json: Option<String>,
    pub caller_context: CallerContext,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
}

impl ExecuteFunctionRequest {
    fn into_execution(self, function_id: String) -> Result<ExecutionRequest, ApiError> {
        let parameters_json = match (self.parameters, self.parameters_json) {
            (Some(_), Some(_)) => {
                return Err(ApiError::bad_request(
                    "give either parameters or parametersJson, not both",
                ))
            }
            (Some(value), None) => value.to_string(),
            (None, Some(json)) => json,
            (None, None) => String::new(),
        };
        Ok(ExecutionRequest {
            function_id,
            parameters_json,
            caller_context: self.caller_context,
            timeout_ms: self.timeout_ms,
            max_output_bytes: self.max_output_bytes,
        })
    }
}

pub async fn register_function(
    State(state): State<AppState>,
    Json(request): Json<RegisterFunctionRequest>,
) -> Result<(StatusCode, Json<FunctionInfo>), ApiError> {
    let info = state
        .service
        .register_function(&request.function_id, &request.source)
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list_functions(State(state): State<AppState>) -> Result<Json<FunctionList>, ApiError> {
    let functions = state.service.list_functions().await?;
    Ok(Json(FunctionList { functions }))
}

pub async fn unregister_function(
    Path(function_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.service.unregister_function(&function_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Script failures are still `200`: the outcome is in the result body.
pub async fn execute_function(
    Path(function_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ExecuteFunctionRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let request = request.into_execution(function_id)?;
    let result = state.service.execute_function(&request).await?;
    Ok(Json(result))
}
