//! Threshold secret sharing over GF(2^8).
//!
//! Each byte of the secret is the constant term of an independent random
//! polynomial of degree `threshold - 1`; share `x` holds the evaluations at
//! `x`. Any `threshold` shares recover the secret by Lagrange interpolation
//! at zero. Fewer reveal nothing.

use rand::RngCore;
use thiserror::Error;

/// One share of a split secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    /// Evaluation point. Never zero.
    pub index: u8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShamirError {
    #[error("threshold {threshold} must be between 1 and share count {count}")]
    InvalidThreshold { threshold: usize, count: usize },

    #[error("share count {0} out of range 1..=255")]
    InvalidCount(usize),

    #[error("no shares supplied")]
    NoShares,

    #[error("share index 0 is reserved")]
    ZeroIndex,

    #[error("duplicate share index {0}")]
    DuplicateIndex(u8),

    #[error("shares have different lengths")]
    LengthMismatch,
}

/// Split `secret` into `count` shares, any `threshold` of which recover it.
///
/// Shares are indexed `1..=count`.
pub fn split(secret: &[u8], threshold: usize, count: usize) -> Result<Vec<Share>, ShamirError> {
    if count == 0 || count > 255 {
        return Err(ShamirError::InvalidCount(count));
    }
    if threshold == 0 || threshold > count {
        return Err(ShamirError::InvalidThreshold { threshold, count });
    }

    let mut rng = rand::thread_rng();
    let mut shares: Vec<Share> = (1..=count)
        .map(|i| Share {
            index: i as u8,
            value: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut coefficients = vec![0u8; threshold];
    for &byte in secret {
        coefficients[0] = byte;
        rng.fill_bytes(&mut coefficients[1..]);
        for share in &mut shares {
            share.value.push(evaluate(&coefficients, share.index));
        }
    }

    Ok(shares)
}

/// Recover the secret from shares.
///
/// Interpolates through every supplied share, so pass exactly the shares
/// that should be trusted (at least the threshold used to split).
pub fn combine(shares: &[Share]) -> Result<Vec<u8>, ShamirError> {
    let first = shares.first().ok_or(ShamirError::NoShares)?;
    let len = first.value.len();

    for (i, share) in shares.iter().enumerate() {
        if share.index == 0 {
            return Err(ShamirError::ZeroIndex);
        }
        if share.value.len() != len {
            return Err(ShamirError::LengthMismatch);
        }
        if shares[..i].iter().any(|s| s.index == share.index) {
            return Err(ShamirError::DuplicateIndex(share.index));
        }
    }

    // Lagrange basis at x = 0. Subtraction is XOR in GF(2^8).
    let basis: Vec<u8> = shares
        .iter()
        .map(|si| {
            shares
                .iter()
                .filter(|sj| sj.index != si.index)
                .fold(1u8, |acc, sj| {
                    gf_mul(acc, gf_div(sj.index, sj.index ^ si.index))
                })
        })
        .collect();

    let secret = (0..len)
        .map(|pos| {
            shares
                .iter()
                .zip(&basis)
                .fold(0u8, |acc, (share, &l)| acc ^ gf_mul(share.value[pos], l))
        })
        .collect();

    Ok(secret)
}

/// Horner evaluation; `coefficients[0]` is the constant term.
fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &c| gf_mul(acc, x) ^ c)
}

/// Multiplication modulo x^8 + x^4 + x^3 + x + 1.
fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

/// a^254 = a^-1 for a != 0.
fn gf_inv(a: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u8;
    while exp != 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

fn gf_div(a: u8, b: u8) -> u8 {
    gf_mul(a, gf_inv(b))
}
