// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave Core - trusted execution core for user functions
//!
//! This crate hosts sealed key/value storage, a registry of user functions
//! and a resource-limited script sandbox inside a trust boundary (Gramine
//! SGX or a simulated boundary), reachable only through a narrow framed
//! call surface.
//!
//! ## Modules
//!
//! - `api` - HTTP handlers for the host binary (Axum)
//! - `blockchain` - EVM JSON-RPC client for script callbacks
//! - `bridge` - Framed call surface, boundary instances and attestation
//! - `crypto` - AEAD sealing, key derivation, signing and key rotation
//! - `registry` - Function registry with source integrity checks
//! - `sandbox` - Script lexer, parser and metered interpreter
//! - `service` - The four-operation capability interface
//! - `storage` - Sealed chunked storage (redb), secrets and audit log

pub mod api;
pub mod blockchain;
pub mod bridge;
pub mod config;
pub mod crypto;
pub mod error;
pub mod registry;
pub mod retry;
pub mod sandbox;
pub mod service;
pub mod state;
pub mod storage;
