// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::bridge::BoundaryPool;
use crate::config::EnclaveConfig;
use crate::service::EnclaveService;

#[derive(Clone)]
pub struct AppState {
    pub service: EnclaveService,
    pub config: Arc<EnclaveConfig>,
}

impl AppState {
    pub fn new(pool: Arc<BoundaryPool>, config: EnclaveConfig) -> Self {
        Self {
            service: EnclaveService::new(pool),
            config: Arc::new(config),
        }
    }

    pub fn pool(&self) -> &BoundaryPool {
        self.service.pool()
    }
}
