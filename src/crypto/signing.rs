// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ECDSA secp256k1 signing and verification.
//!
//! Signatures are 64-byte compact `r ‖ s`; public keys are SEC1
//! compressed (33 bytes).

use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use zeroize::Zeroizing;

use super::random::fill_random;
use super::{CryptoError, CryptoResult};

/// A private signing key held inside the boundary.
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a key from the OS CSPRNG.
    pub fn generate() -> CryptoResult<Self> {
        // A random 32-byte string is a valid scalar with overwhelming
        // probability; retry the rare out-of-range draw.
        for _ in 0..8 {
            let mut bytes = Zeroizing::new([0u8; 32]);
            fill_random(&mut bytes[..])?;
            if let Ok(signing_key) = SigningKey::from_slice(&bytes[..]) {
                return Ok(Self { signing_key });
            }
        }
        Err(CryptoError::Failure(
            "could not draw a valid secp256k1 scalar".to_string(),
        ))
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        SigningKey::from_slice(bytes)
            .map(|signing_key| Self { signing_key })
            .map_err(|_| CryptoError::InvalidKey("not a secp256k1 private key".to_string()))
    }

    /// Private scalar, for sealing to storage.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    /// SEC1 compressed public key.
    pub fn public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_bytes().to_vec()
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

/// Check `signature` over `data` against a SEC1 public key.
///
/// A well-formed key with a wrong or malformed signature yields
/// `Ok(false)`; only an unparsable public key is an error.
pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> CryptoResult<bool> {
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|_| CryptoError::InvalidKey("not a SEC1 secp256k1 public key".to_string()))?;
    let Ok(signature) = Signature::from_slice(signature) else {
        return Ok(false);
    };
    Ok(verifying_key.verify(data, &signature).is_ok())
}
