// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Static checks run before a script is compiled.
//!
//! Identifiers are checked on the token stream, so a banned word inside a
//! string literal is harmless while the same word as code is rejected.

use crate::error::{EnclaveError, ErrorKind};

use super::lexer::{Token, TokenKind};
use super::limits::MAX_LINE_LENGTH;

/// Identifiers and keywords scripts may not use.
pub const DISALLOWED_IDENTIFIERS: &[&str] = &[
    "eval",
    "Function",
    "import",
    "export",
    "fetch",
    "XMLHttpRequest",
    "process",
    "global",
    "globalThis",
    "window",
    "document",
    "__proto__",
    "constructor",
    "prototype",
    "new",
    "class",
    "with",
    "async",
    "await",
    "yield",
    "delete",
];

/// Size and shape checks on the raw source.
pub fn check_source(source: &str, max_source_bytes: usize) -> Result<(), EnclaveError> {
    if source.len() > max_source_bytes {
        return Err(EnclaveError::new(
            ErrorKind::ResourceLimitExceeded,
            format!(
                "source is {} bytes, limit is {max_source_bytes}",
                source.len()
            ),
        ));
    }
    if source.trim().is_empty() {
        return Err(EnclaveError::new(ErrorKind::ScriptError, "source is empty"));
    }
    if let Some((index, _)) = source
        .lines()
        .enumerate()
        .find(|(_, line)| line.chars().count() > MAX_LINE_LENGTH)
    {
        return Err(EnclaveError::new(
            ErrorKind::ScriptError,
            format!(
                "line {} exceeds {MAX_LINE_LENGTH} characters",
                index + 1
            ),
        ));
    }
    Ok(())
}

/// Reject disallowed identifiers anywhere in the token stream, including
/// inside template substitutions.
pub fn check_tokens(tokens: &[Token]) -> Result<(), EnclaveError> {
    for token in tokens {
        match &token.kind {
            TokenKind::Ident(name) if DISALLOWED_IDENTIFIERS.contains(&name.as_str()) => {
                return Err(EnclaveError::new(
                    ErrorKind::ScriptError,
                    format!("`{name}` is not allowed ({})", token.pos),
                ));
            }
            TokenKind::Template { exprs, .. } => {
                for inner in exprs {
                    check_tokens(inner)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}
