// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operation codes multiplexed through the bridge call surface.

use serde::{Deserialize, Serialize};

use crate::error::EnclaveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    RegisterFunction = 0x01,
    UnregisterFunction = 0x02,
    ListFunctions = 0x03,
    ExecuteFunction = 0x04,
    StoreSecret = 0x10,
    DeleteSecret = 0x11,
    Store = 0x20,
    Retrieve = 0x21,
    Delete = 0x22,
    ListKeys = 0x23,
    Sign = 0x30,
    Verify = 0x31,
    Attest = 0x40,
    RotateKey = 0x50,
    ValidateIntegrity = 0x51,
    UsageStats = 0x52,
}

impl Opcode {
    pub const ALL: [Opcode; 16] = [
        Opcode::RegisterFunction,
        Opcode::UnregisterFunction,
        Opcode::ListFunctions,
        Opcode::ExecuteFunction,
        Opcode::StoreSecret,
        Opcode::DeleteSecret,
        Opcode::Store,
        Opcode::Retrieve,
        Opcode::Delete,
        Opcode::ListKeys,
        Opcode::Sign,
        Opcode::Verify,
        Opcode::Attest,
        Opcode::RotateKey,
        Opcode::ValidateIntegrity,
        Opcode::UsageStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::RegisterFunction => "register_function",
            Opcode::UnregisterFunction => "unregister_function",
            Opcode::ListFunctions => "list_functions",
            Opcode::ExecuteFunction => "execute_function",
            Opcode::StoreSecret => "store_secret",
            Opcode::DeleteSecret => "delete_secret",
            Opcode::Store => "store",
            Opcode::Retrieve => "retrieve",
            Opcode::Delete => "delete",
            Opcode::ListKeys => "list_keys",
            Opcode::Sign => "sign",
            Opcode::Verify => "verify",
            Opcode::Attest => "attest",
            Opcode::RotateKey => "rotate_key",
            Opcode::ValidateIntegrity => "validate_integrity",
            Opcode::UsageStats => "usage_stats",
        }
    }

    /// Whether the payload may carry secret material that must never be
    /// echoed in error messages.
    pub fn carries_secret(&self) -> bool {
        matches!(self, Opcode::StoreSecret | Opcode::Store | Opcode::Sign)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = EnclaveError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .into_iter()
            .find(|op| *op as u8 == value)
            .ok_or_else(|| EnclaveError::invalid_payload(format!("unknown opcode 0x{value:02x}")))
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn every_opcode_decodes_to_itself() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op as u8).unwrap(), op);
        }
    }

    #[test]
    fn unknown_opcode_is_invalid_payload() {
        let err = Opcode::try_from(0xff).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPayload);
    }
}
