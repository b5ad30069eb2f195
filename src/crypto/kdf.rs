// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PBKDF2-HMAC-SHA256 key derivation.

use std::num::NonZeroU32;

use ring::pbkdf2;
use zeroize::Zeroize;

use super::keys::{KeyMaterial, KEY_LEN};
use super::{CryptoError, CryptoResult};

/// Shortest salt accepted by [`derive_key`].
pub const MIN_SALT_LEN: usize = 16;

/// Fewest iterations accepted by [`derive_key`].
pub const MIN_ITERATIONS: u32 = 10_000;

/// Iteration floor for sealing keys (enforced by configuration).
pub const RECOMMENDED_ITERATIONS: u32 = 100_000;

/// Derive a 32-byte key from a password or master secret.
///
/// # Errors
/// `WeakParameters` if the secret is empty, the salt is shorter than
/// [`MIN_SALT_LEN`] or `iterations` is below [`MIN_ITERATIONS`].
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> CryptoResult<KeyMaterial> {
    if secret.is_empty() {
        return Err(CryptoError::WeakParameters("empty secret".to_string()));
    }
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::WeakParameters(format!(
            "salt must be at least {MIN_SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    let rounds = NonZeroU32::new(iterations)
        .filter(|n| n.get() >= MIN_ITERATIONS)
        .ok_or_else(|| {
            CryptoError::WeakParameters(format!(
                "at least {MIN_ITERATIONS} iterations required, got {iterations}"
            ))
        })?;

    let mut out = [0u8; KEY_LEN];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, rounds, salt, secret, &mut out);
    let key = KeyMaterial::new(out);
    out.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = b"0123456789abcdef";

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_key(b"master", SALT, MIN_ITERATIONS).unwrap();
        let b = derive_key(b"master", SALT, MIN_ITERATIONS).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_and_secret_change_the_key() {
        let base = derive_key(b"master", SALT, MIN_ITERATIONS).unwrap();
        let other_salt = derive_key(b"master", b"fedcba9876543210", MIN_ITERATIONS).unwrap();
        let other_secret = derive_key(b"other", SALT, MIN_ITERATIONS).unwrap();
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
        assert_ne!(base.as_bytes(), other_secret.as_bytes());
    }

    #[test]
    fn short_salt_is_weak() {
        let err = derive_key(b"master", b"short", RECOMMENDED_ITERATIONS).unwrap_err();
        assert!(matches!(err, CryptoError::WeakParameters(_)));
    }

    #[test]
    fn few_iterations_are_weak() {
        assert!(matches!(
            derive_key(b"master", SALT, MIN_ITERATIONS - 1),
            Err(CryptoError::WeakParameters(_))
        ));
        assert!(matches!(
            derive_key(b"master", SALT, 0),
            Err(CryptoError::WeakParameters(_))
        ));
    }

    #[test]
    fn empty_secret_is_weak() {
        assert!(matches!(
            derive_key(b"", SALT, MIN_ITERATIONS),
            Err(CryptoError::WeakParameters(_))
        ));
    }
}
