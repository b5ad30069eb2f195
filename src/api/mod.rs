// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub mod attestation;
pub mod functions;
pub mod health;
pub mod secrets;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_payload_bytes;

    let v1_routes = Router::new()
        .route(
            "/functions",
            get(functions::list_functions).post(functions::register_function),
        )
        .route(
            "/functions/{function_id}",
            delete(functions::unregister_function),
        )
        .route(
            "/functions/{function_id}/execute",
            post(functions::execute_function),
        )
        .route("/secrets", post(secrets::store_secret))
        .route("/secrets/{secret_id}", delete(secrets::delete_secret))
        .route("/attestation", post(attestation::attest));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
