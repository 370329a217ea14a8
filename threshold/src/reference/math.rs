//! Scalar/group arithmetic backing [`super::ReferenceLatticeScheme`].
//!
//! We work in a 256-bit prime-order subgroup of `Z_p*` (`p = 2q + 1`, a
//! safe prime, `g` a generator of the order-`q` subgroup) rather than an
//! elliptic curve, purely to avoid pulling in a curve crate for a backend
//! that exists only to exercise the coordination logic above it. The
//! arithmetic (Shamir sharing, Lagrange interpolation, Schnorr-style
//! commit/respond/aggregate) is the same shape a real FROST-like scheme over
//! a lattice group would use.

use hmac::{Hmac, Mac};
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const Q_HEX: &str = "c284a6f8667f984ede476e19d5f62af50761aa48b8bfb32e0149ba377795d55d";
const P_HEX: &str = "185094df0ccff309dbc8edc33abec55ea0ec35491717f665c0293746eef2baabb";
const G_HEX: &str = "1f6f516656e5866a46dacddb7cd425134cbf918b9d97bf38c0f61e7002e7941c";

pub fn order() -> BigUint {
    BigUint::parse_bytes(Q_HEX.as_bytes(), 16).expect("Q_HEX is a valid hex literal")
}

pub fn modulus() -> BigUint {
    BigUint::parse_bytes(P_HEX.as_bytes(), 16).expect("P_HEX is a valid hex literal")
}

pub fn generator() -> BigUint {
    BigUint::parse_bytes(G_HEX.as_bytes(), 16).expect("G_HEX is a valid hex literal")
}

/// `base^exp mod p`.
pub fn group_pow(base: &BigUint, exp: &BigUint) -> BigUint {
    base.modpow(exp, &modulus())
}

/// `g^exp mod p`.
pub fn group_gen_pow(exp: &BigUint) -> BigUint {
    group_pow(&generator(), exp)
}

/// `(a * b) mod p`.
pub fn group_mul(a: &BigUint, b: &BigUint) -> BigUint {
    (a * b) % modulus()
}

/// `a^-1 mod q`, via Fermat's little theorem (`q` is prime).
pub fn scalar_inverse(a: &BigUint) -> BigUint {
    let q = order();
    a.modpow(&(q.clone() - BigUint::from(2u32)), &q)
}

pub fn scalar_add(a: &BigUint, b: &BigUint) -> BigUint {
    (a + b) % order()
}

pub fn scalar_mul(a: &BigUint, b: &BigUint) -> BigUint {
    (a * b) % order()
}

/// Reduces a signed value into `[0, q)`.
pub fn scalar_reduce(x: &BigInt) -> BigUint {
    let q = BigInt::from(order());
    let r = ((x % &q) + &q) % &q;
    r.to_biguint().expect("non-negative by construction")
}

/// Hashes an arbitrary number of byte strings into a scalar mod `q`. Used
/// both as the Fiat-Shamir challenge and as a generic domain-separated hash.
pub fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> BigUint {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    BigUint::from_bytes_be(&digest) % order()
}

/// Derives a deterministic per-(session, participant set, party) nonce
/// scalar from the shared PRF key. Determinism here is what spec.md §4.3
/// means by "signatures are deterministic given (session, PRF key, inputs)".
pub fn derive_nonce(prf_key: &[u8; 32], domain: &[u8], parts: &[&[u8]]) -> BigUint {
    let mut mac = HmacSha256::new_from_slice(prf_key).expect("HMAC accepts any key length");
    mac.update(domain);
    for part in parts {
        mac.update((part.len() as u64).to_be_bytes());
        mac.update(part);
    }
    let tag = mac.finalize().into_bytes();
    BigUint::from_bytes_be(&tag) % order()
}

/// Lagrange coefficient `L_i(0)` for party `x_i` within `all_indices`,
/// evaluated over the scalar field `Z_q`.
pub fn lagrange_coefficient_at_zero(x_i: u32, all_indices: &[u32]) -> BigUint {
    let mut numerator = BigInt::one();
    let mut denominator = BigInt::one();
    let xi = BigInt::from(x_i);
    for &x_j in all_indices {
        if x_j == x_i {
            continue;
        }
        let xj = BigInt::from(x_j);
        numerator *= -&xj;
        denominator *= &xi - &xj;
    }
    if denominator.is_zero() {
        // Unreachable given distinct party indices, kept as a defensive guard.
        return BigUint::zero();
    }
    let denom_scalar = scalar_reduce(&denominator);
    let inv = scalar_inverse(&denom_scalar);
    let num_scalar = scalar_reduce(&numerator);
    scalar_mul(&num_scalar, &inv)
}

pub fn biguint_to_32_bytes(x: &BigUint) -> [u8; 32] {
    let bytes = x.to_bytes_be();
    let mut out = [0u8; 32];
    let start = 32usize.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(32)..]);
    out
}
