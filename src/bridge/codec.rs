// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wire format of the bridge call surface.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "NSLB"
//! 4       1     protocol version (1)
//! 5       1     opcode
//! 6       2     reserved, must be zero
//! 8       4     payload length, big-endian
//! 12      n     payload (JSON)
//! ```
//!
//! Requests and responses share the frame layout. Frames are checked in
//! full before anything is dispatched; any defect is `InvalidPayload`.
//! Byte fields inside payloads are standard base64.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{EnclaveError, ErrorKind};
use crate::storage::StoreOptions;

use super::opcode::Opcode;

pub const MAGIC: [u8; 4] = *b"NSLB";
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 12;

/// A decoded, length-checked frame. The payload may carry secrets and is
/// wiped on drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Zeroizing<Vec<u8>>,
}

pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| EnclaveError::invalid_payload("payload does not fit a frame"))?;
    let mut frame = Zeroizing::new(Vec::with_capacity(HEADER_LEN + payload.len()));
    frame.extend_from_slice(&MAGIC);
    frame.push(PROTOCOL_VERSION);
    frame.push(opcode as u8);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

pub fn encode_request<T: Serialize>(
    opcode: Opcode,
    payload: &T,
) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
    let json = Zeroizing::new(
        serde_json::to_vec(payload).map_err(|e| EnclaveError::invalid_payload(e.to_string()))?,
    );
    encode_frame(opcode, &json)
}

/// Check and split a frame. The payload must be JSON.
pub fn decode_frame(bytes: &[u8], max_payload_bytes: usize) -> Result<Frame, EnclaveError> {
    if bytes.len() < HEADER_LEN {
        return Err(EnclaveError::invalid_payload(format!(
            "frame is {} bytes, header alone is {HEADER_LEN}",
            bytes.len()
        )));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    if header[0..4] != MAGIC {
        return Err(EnclaveError::invalid_payload("bad frame magic"));
    }
    if header[4] != PROTOCOL_VERSION {
        return Err(EnclaveError::invalid_payload(format!(
            "unsupported protocol version {}",
            header[4]
        )));
    }
    let opcode = Opcode::try_from(header[5])?;
    if header[6] != 0 || header[7] != 0 {
        return Err(EnclaveError::invalid_payload("reserved header bytes must be zero"));
    }
    let declared = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if declared > max_payload_bytes {
        return Err(EnclaveError::invalid_payload(format!(
            "payload length {declared} exceeds limit {max_payload_bytes}"
        )));
    }
    if declared != payload.len() {
        return Err(EnclaveError::invalid_payload(format!(
            "declared payload length {declared}, got {}",
            payload.len()
        )));
    }
    if serde_json::from_slice::<serde::de::IgnoredAny>(payload).is_err() {
        return Err(EnclaveError::invalid_payload("payload is not JSON"));
    }
    Ok(Frame {
        opcode,
        payload: Zeroizing::new(payload.to_vec()),
    })
}

impl Frame {
    /// Deserialize the payload. Error messages carry only a position, never
    /// payload content.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, EnclaveError> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            EnclaveError::invalid_payload(format!(
                "malformed {} payload at line {}, column {}",
                self.opcode,
                e.line(),
                e.column()
            ))
        })
    }
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub error_kind: ErrorKind,
    pub message: String,
}

/// `{"ok": true, "result": ...}` or `{"ok": false, "error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl BridgeResponse {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: &EnclaveError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(WireError {
                error_kind: error.kind,
                message: error.message.clone(),
            }),
        }
    }

    pub fn into_result(self) -> Result<serde_json::Value, EnclaveError> {
        match (self.ok, self.error) {
            (true, _) => Ok(self.result.unwrap_or(serde_json::Value::Null)),
            (false, Some(error)) => Err(EnclaveError::new(error.error_kind, error.message)),
            (false, None) => Err(EnclaveError::internal("failure response without an error")),
        }
    }
}

impl From<Result<serde_json::Value, EnclaveError>> for BridgeResponse {
    fn from(result: Result<serde_json::Value, EnclaveError>) -> Self {
        match result {
            Ok(value) => BridgeResponse::success(value),
            Err(e) => BridgeResponse::failure(&e),
        }
    }
}

pub fn encode_response(
    opcode: Opcode,
    response: &BridgeResponse,
) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
    let json = Zeroizing::new(
        serde_json::to_vec(response).map_err(|e| EnclaveError::internal(e.to_string()))?,
    );
    encode_frame(opcode, &json)
}

pub fn decode_response(
    bytes: &[u8],
    max_payload_bytes: usize,
) -> Result<(Opcode, BridgeResponse), EnclaveError> {
    let frame = decode_frame(bytes, max_payload_bytes)?;
    let response = frame.parse()?;
    Ok((frame.opcode, response))
}

// =============================================================================
// Payloads
// =============================================================================

/// Base64 for `Vec<u8>` fields.
pub mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(|_| serde::de::Error::custom("invalid base64"))
    }
}

/// Base64 for secret fields; the decoded bytes are zeroized on drop.
pub mod base64_secret {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(Base64::encode_string(bytes));
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Zeroizing<Vec<u8>>, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        Base64::decode_vec(&encoded)
            .map(Zeroizing::new)
            .map_err(|_| serde::de::Error::custom("invalid base64"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFunctionPayload {
    pub function_id: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionIdPayload {
    pub function_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSecretPayload {
    pub secret_id: String,
    #[serde(with = "base64_secret")]
    pub value: Zeroizing<Vec<u8>>,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSecretPayload {
    pub secret_id: String,
    pub owner: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOptionsPayload {
    #[serde(default = "default_true")]
    pub encrypt: bool,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub chunk_size_bytes: usize,
    #[serde(default)]
    pub allow_empty: bool,
    #[serde(default)]
    pub keep_versions: bool,
}

impl Default for StoreOptionsPayload {
    fn default() -> Self {
        Self {
            encrypt: true,
            compress: false,
            chunk_size_bytes: 0,
            allow_empty: false,
            keep_versions: false,
        }
    }
}

impl From<StoreOptionsPayload> for StoreOptions {
    fn from(p: StoreOptionsPayload) -> Self {
        StoreOptions {
            encrypt: p.encrypt,
            compress: p.compress,
            chunk_size_bytes: p.chunk_size_bytes,
            allow_empty: p.allow_empty,
            create_only: false,
            keep_versions: p.keep_versions,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePayload {
    pub key: String,
    #[serde(with = "base64_secret")]
    pub data: Zeroizing<Vec<u8>>,
    #[serde(default)]
    pub options: StoreOptionsPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPayload {
    pub key: String,
    /// Retrieve a retained older version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListKeysPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPayload {
    #[serde(with = "base64_secret")]
    pub data: Zeroizing<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPayload {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestPayload {
    /// Caller data bound into the quote, usually a verifier nonce.
    #[serde(default, with = "base64_bytes")]
    pub report_data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveResult {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResult {
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MAX: usize = 1024;

    fn frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[PROTOCOL_VERSION, opcode, 0, 0]);
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn decodes_a_well_formed_request() {
        let bytes = encode_request(
            Opcode::RegisterFunction,
            &RegisterFunctionPayload {
                function_id: "double".into(),
                source: "function double(x) { return x * 2; }".into(),
            },
        )
        .unwrap();
        let frame = decode_frame(&bytes, MAX).unwrap();
        assert_eq!(frame.opcode, Opcode::RegisterFunction);
        let payload: RegisterFunctionPayload = frame.parse().unwrap();
        assert_eq!(payload.function_id, "double");
    }

    fn wiped_on_drop<T: zeroize::ZeroizeOnDrop>(_: &T) {}

    #[test]
    fn secret_bearing_buffers_are_wiped_on_drop() {
        let bytes = encode_request(
            Opcode::StoreSecret,
            &StoreSecretPayload {
                secret_id: "api-key".into(),
                value: Zeroizing::new(b"s3cr3t".to_vec()),
                owner: "owner1".into(),
            },
        )
        .unwrap();
        wiped_on_drop(&bytes);

        let mut frame = decode_frame(&bytes, MAX).unwrap();
        wiped_on_drop(&frame.payload);
        let payload: StoreSecretPayload = frame.parse().unwrap();
        assert_eq!(payload.value.as_slice(), b"s3cr3t");

        zeroize::Zeroize::zeroize(&mut frame.payload);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn rejects_malformed_frames() {
        let good = frame(Opcode::ListFunctions as u8, b"{}");
        assert!(decode_frame(&good, MAX).is_ok());

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        let mut bad_version = good.clone();
        bad_version[4] = 9;
        let mut reserved = good.clone();
        reserved[7] = 1;
        let mut long_len = good.clone();
        long_len[11] = 3;

        for bytes in [
            bad_magic,
            bad_version,
            reserved,
            long_len,
            frame(0xee, b"{}"),
            frame(Opcode::ListFunctions as u8, b"not json"),
            good[..8].to_vec(),
        ] {
            let err = decode_frame(&bytes, MAX).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidPayload);
        }
    }

    #[test]
    fn enforces_payload_cap() {
        let payload = serde_json::to_vec(&json!({ "pad": "x".repeat(64) })).unwrap();
        let bytes = frame(Opcode::Store as u8, &payload);
        let err = decode_frame(&bytes, 16).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPayload);
    }

    #[test]
    fn parse_errors_do_not_echo_payload() {
        let bytes = frame(Opcode::StoreSecret as u8, br#"{"secretId": 7, "value": "s3cr3t"}"#);
        let err = decode_frame(&bytes, MAX)
            .unwrap()
            .parse::<StoreSecretPayload>()
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidPayload);
        assert!(!err.message.contains("s3cr3t"));
    }

    #[test]
    fn responses_carry_structured_errors() {
        let failure = BridgeResponse::failure(&EnclaveError::not_found("fn:x"));
        let bytes = encode_response(Opcode::Retrieve, &failure).unwrap();
        let (opcode, decoded) = decode_response(&bytes, MAX).unwrap();
        assert_eq!(opcode, Opcode::Retrieve);
        let value: serde_json::Value = serde_json::from_slice(&bytes[HEADER_LEN..]).unwrap();
        assert_eq!(value["error"]["errorKind"], "NotFound");
        assert_eq!(decoded.into_result().unwrap_err().kind, ErrorKind::NotFound);

        let ok = BridgeResponse::success(json!([1, 2]));
        assert_eq!(ok.into_result().unwrap(), json!([1, 2]));
    }

    #[test]
    fn store_options_default_to_encrypted() {
        let payload: StorePayload =
            serde_json::from_value(json!({ "key": "k", "data": "aGk=" })).unwrap();
        assert_eq!(payload.data.as_slice(), b"hi");
        let options: StoreOptions = payload.options.clone().into();
        assert!(options.encrypt);
        assert!(!options.create_only);
    }
}
