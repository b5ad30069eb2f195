// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM sealing with detached tags.
//!
//! Every call draws a fresh 96-bit nonce from the OS CSPRNG. For the
//! 2^32 messages GCM allows under one key, the chance of any two random
//! nonces colliding stays below 2^-32; rotation keeps per-key counts far
//! below that.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use zeroize::Zeroize;

use super::keys::KeyMaterial;
use super::random::fill_random;
use super::{CryptoError, CryptoResult};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Ciphertext with its nonce and authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

impl SealedBox {
    /// `nonce ‖ tag ‖ ciphertext`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Inverse of [`SealedBox::to_bytes`]. A truncated buffer cannot
    /// authenticate, so it is reported as an integrity failure.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::IntegrityViolation);
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[NONCE_LEN..NONCE_LEN + TAG_LEN]);
        Ok(Self {
            ciphertext: bytes[NONCE_LEN + TAG_LEN..].to_vec(),
            nonce,
            tag,
        })
    }
}

fn aead_key(key: &KeyMaterial) -> CryptoResult<LessSafeKey> {
    UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map(LessSafeKey::new)
        .map_err(|_| CryptoError::InvalidKey("AES-256-GCM key rejected".to_string()))
}

pub fn seal(plaintext: &[u8], key: &KeyMaterial) -> CryptoResult<SealedBox> {
    seal_with_aad(plaintext, key, &[])
}

/// Seal `plaintext`, authenticating `aad` alongside it.
pub fn seal_with_aad(plaintext: &[u8], key: &KeyMaterial, aad: &[u8]) -> CryptoResult<SealedBox> {
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let aead = aead_key(key)?;
    let mut in_out = plaintext.to_vec();
    let tag = aead
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| CryptoError::Failure("AES-256-GCM seal failed".to_string()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());
    Ok(SealedBox {
        ciphertext: in_out,
        nonce,
        tag: tag_bytes,
    })
}

pub fn unseal(
    ciphertext: &[u8],
    key: &KeyMaterial,
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
) -> CryptoResult<Vec<u8>> {
    unseal_with_aad(ciphertext, key, nonce, tag, &[])
}

/// Open a sealed buffer. On tag mismatch the working buffer is wiped and
/// no plaintext is returned.
pub fn unseal_with_aad(
    ciphertext: &[u8],
    key: &KeyMaterial,
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let aead = aead_key(key)?;
    let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let len = match aead.open_in_place(
        Nonce::assume_unique_for_key(*nonce),
        Aad::from(aad),
        &mut in_out,
    ) {
        Ok(plaintext) => plaintext.len(),
        Err(_) => {
            in_out.zeroize();
            return Err(CryptoError::IntegrityViolation);
        }
    };
    in_out.truncate(len);
    Ok(in_out)
}
