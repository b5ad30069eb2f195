// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Secure randomness from the OS CSPRNG.

use ring::rand::{SecureRandom, SystemRandom};

use super::{CryptoError, CryptoResult};

pub fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| CryptoError::RandomUnavailable)
}

pub fn random_bytes(len: usize) -> CryptoResult<Vec<u8>> {
    let mut out = vec![0u8; len];
    fill_random(&mut out)?;
    Ok(out)
}

fn next_u64() -> CryptoResult<u64> {
    let mut buf = [0u8; 8];
    fill_random(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Uniform integer in `min..=max`.
///
/// # Errors
/// `Range` if `min > max`.
pub fn secure_random(min: i64, max: i64) -> CryptoResult<i64> {
    if min > max {
        return Err(CryptoError::Range { min, max });
    }
    let span = (max as i128 - min as i128) as u128 + 1;
    if span > u64::MAX as u128 {
        return Ok((min as i128 + next_u64()? as i128) as i64);
    }

    // Rejection sampling keeps the distribution uniform.
    let span = span as u64;
    let limit = u64::MAX - (u64::MAX % span);
    loop {
        let r = next_u64()?;
        if r < limit {
            return Ok((min as i128 + (r % span) as i128) as i64);
        }
    }
}

/// Uniform float in `[0, 1)` with 53 bits of precision.
pub fn random_f64() -> CryptoResult<f64> {
    Ok((next_u64()? >> 11) as f64 / (1u64 << 53) as f64)
}
