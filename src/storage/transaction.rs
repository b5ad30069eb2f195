// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Write transactions for the sealed store.
//!
//! A transaction only buffers operations. Nothing touches the database
//! until commit, which applies the whole buffer in one redb write
//! transaction.

use uuid::Uuid;
use zeroize::Zeroizing;

use super::sealed::StoreOptions;

/// Caller-owned handle for an open transaction.
///
/// Not `Clone`: commit and rollback consume it, so a handle cannot be
/// reused after its transaction is closed.
#[derive(Debug, PartialEq, Eq)]
pub struct TransactionHandle {
    id: Uuid,
}

impl TransactionHandle {
    pub(crate) fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

/// A buffered operation.
pub(crate) enum StagedOp {
    Put {
        key: String,
        data: Zeroizing<Vec<u8>>,
        options: StoreOptions,
    },
    Delete {
        key: String,
    },
}

impl StagedOp {
    pub(crate) fn key(&self) -> &str {
        match self {
            StagedOp::Put { key, .. } | StagedOp::Delete { key } => key,
        }
    }
}

/// The single writer slot of a store.
pub(crate) struct OpenTransaction {
    pub id: Uuid,
    pub ops: Vec<StagedOp>,
}

impl OpenTransaction {
    pub(crate) fn new(handle: &TransactionHandle) -> Self {
        Self {
            id: handle.id,
            ops: Vec::new(),
        }
    }
}
