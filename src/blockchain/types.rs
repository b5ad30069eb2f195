// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Input types and parsing for chain queries.

use std::str::FromStr;

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use super::rpc::RpcError;

/// A read-only contract call as issued by a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCall {
    pub address: String,
    /// 0x-prefixed calldata, usually a 4-byte selector.
    pub method: String,
    /// Extra ABI-encoded words appended to `method`, as hex strings.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ContractCall {
    /// Full calldata: `method` followed by every hex string in `params`.
    pub fn calldata(&self) -> Result<Bytes, RpcError> {
        let mut data = decode_hex(&self.method)?;
        match &self.params {
            serde_json::Value::Null => {}
            serde_json::Value::String(word) => data.extend(decode_hex(word)?),
            serde_json::Value::Array(words) => {
                for word in words {
                    let word = word.as_str().ok_or_else(|| {
                        RpcError::InvalidCalldata("params must be hex strings".to_string())
                    })?;
                    data.extend(decode_hex(word)?);
                }
            }
            _ => {
                return Err(RpcError::InvalidCalldata(
                    "params must be a hex string or an array of them".to_string(),
                ))
            }
        }
        Ok(Bytes::from(data))
    }
}

pub fn parse_address(address: &str) -> Result<Address, RpcError> {
    Address::from_str(address.trim()).map_err(|e| RpcError::InvalidAddress(e.to_string()))
}

/// Storage slot as decimal or 0x-prefixed hex.
pub fn parse_slot(slot: &str) -> Result<U256, RpcError> {
    let slot = slot.trim();
    let parsed = match slot.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(slot, 10),
    };
    parsed.map_err(|e| RpcError::InvalidSlot(e.to_string()))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, RpcError> {
    let s = s.trim();
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| RpcError::InvalidCalldata(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn calldata_concatenates_selector_and_words() {
        let call = ContractCall {
            address: "0x0000000000000000000000000000000000000001".into(),
            method: "0x18160ddd".into(),
            params: json!(["0x01", "02"]),
        };
        assert_eq!(call.calldata().unwrap().to_vec(), vec![0x18, 0x16, 0x0d, 0xdd, 1, 2]);
    }

    #[test]
    fn calldata_rejects_non_hex() {
        let call = ContractCall {
            address: "0x0000000000000000000000000000000000000001".into(),
            method: "totalSupply".into(),
            params: json!(null),
        };
        assert!(matches!(call.calldata(), Err(RpcError::InvalidCalldata(_))));
    }

    #[test]
    fn slots_accept_decimal_and_hex() {
        assert_eq!(parse_slot("10").unwrap(), U256::from(10u64));
        assert_eq!(parse_slot("0x0a").unwrap(), U256::from(10u64));
        assert!(parse_slot("zz").is_err());
    }

    #[test]
    fn addresses_are_validated() {
        assert!(parse_address("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E").is_ok());
        assert!(matches!(
            parse_address("not-an-address"),
            Err(RpcError::InvalidAddress(_))
        ));
    }
}
