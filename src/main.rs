// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr, process::ExitCode, sync::Arc};

use enclave_core::{
    api::router,
    blockchain::{BlockchainClient, EvmRpcClient, UnavailableBlockchain},
    bridge::BoundaryPool,
    config::{EnclaveConfig, HOST_ENV, LOG_FORMAT_ENV, PORT_ENV},
    state::AppState,
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_names(true);

    if env::var(LOG_FORMAT_ENV).is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match EnclaveConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let blockchain: Arc<dyn BlockchainClient> = match &config.rpc_url {
        Some(rpc_url) => match EvmRpcClient::new(rpc_url, tokio::runtime::Handle::current()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(error = %e, "Invalid blockchain RPC endpoint");
                return ExitCode::FAILURE;
            }
        },
        None => {
            tracing::warn!("No blockchain RPC endpoint configured, script chain queries will fail");
            Arc::new(UnavailableBlockchain)
        }
    };

    let pool = Arc::new(BoundaryPool::new(&config, blockchain));
    if let Err(e) = pool.initialize().await {
        tracing::error!(error_kind = %e.kind, error = %e, "Trust boundary unavailable");
        pool.destroy().await;
        return ExitCode::FAILURE;
    }

    let host = env::var(HOST_ENV).unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var(PORT_ENV)
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, host = %host, port, "Invalid bind address");
            pool.destroy().await;
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        platform = %config.platform.as_str(),
        instances = pool.len(),
        storage = %config.storage_path.display(),
        "Enclave core ready"
    );
    let app = router(AppState::new(pool.clone(), config));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind");
            pool.destroy().await;
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Enclave host listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    pool.destroy().await;
    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
