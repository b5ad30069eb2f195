// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Script Sandbox
//!
//! Runs registered script functions written in a small JavaScript subset.
//! The interpreter is a tree walker over a parsed [`ast::Program`]; nothing
//! in the language can reach the filesystem, the network or the process.
//!
//! ## Security Model
//!
//! - The global scope is an explicit allow-list: `context`, `secrets`,
//!   `blockchain`, `log`/`assert`/`require`, and a handful of pure
//!   utilities (`Math`, `JSON`, ...). There is no prototype chain and no
//!   dynamic code loading.
//! - Source is rejected before compilation if it names a disallowed
//!   identifier (see [`validate::DISALLOWED_IDENTIFIERS`]).
//! - Time, memory, call depth, log volume and output size are enforced by
//!   the interpreter itself through a [`limits::Budget`]. Limit violations
//!   unwind the interpreter and cannot be caught by script code.
//! - Host callbacks (secrets, blockchain) go through [`ScriptHost`]. Each
//!   callback receives its own timeout, never longer than the remaining
//!   execution time.
//! - Secret values handed to a script are scrubbed from runtime error
//!   messages before they leave the sandbox.

use std::time::Duration;

use zeroize::Zeroizing;

use crate::error::EnclaveError;

pub mod ast;
pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod limits;
pub mod parser;
pub mod runtime;
pub mod validate;
pub mod value;

pub use limits::{ExecutionLimits, SandboxLimits};
pub use runtime::{
    CallerContext, ExecutionRequest, ExecutionResult, ExecutionState, ScriptRuntime,
};

/// Callbacks a running script may make into its host.
///
/// Implementations run on the execution thread and must return within the
/// given timeout.
pub trait ScriptHost {
    /// Secret bytes for `secret_id`, already checked against the caller.
    fn secret(&self, secret_id: &str) -> Result<Zeroizing<Vec<u8>>, EnclaveError>;

    fn call_contract(
        &self,
        address: &str,
        method: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, EnclaveError>;

    fn get_balance(&self, address: &str, timeout: Duration) -> Result<String, EnclaveError>;

    fn get_storage(&self, address: &str, slot: &str, timeout: Duration)
        -> Result<String, EnclaveError>;
}
