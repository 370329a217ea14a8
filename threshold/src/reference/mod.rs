mod math;

use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::ThresholdError;
use crate::scheme::{ThresholdScheme, ThresholdSigner};
use crate::session::{PartyIndex, PrfKey, SessionId};

/// A Shamir share of the group secret, bundled with the group's public key
/// so a lone [`ReferenceSigner`] can run both rounds without an extra
/// out-of-band lookup.
#[derive(Clone, Serialize, Deserialize)]
pub struct ReferenceShare {
    index: u32,
    secret_share: BigUint,
    group_key: BigUint,
}

impl std::fmt::Debug for ReferenceShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceShare").field("index", &self.index).finish()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceGroupKey(BigUint);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSignature {
    r: BigUint,
    s: BigUint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceRound1 {
    party: u32,
    commitment: BigUint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceRound2 {
    party: u32,
    commitment: BigUint,
    response: BigUint,
}

/// Simplified discrete-log threshold Schnorr scheme standing in for a
/// lattice-based signature library (see module docs on [`ReferenceShare`]).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceLatticeScheme;

pub struct ReferenceSigner {
    share: ReferenceShare,
}

fn domain_bytes(session: SessionId, participants: &[PartyIndex]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + participants.len() * 4);
    buf.extend_from_slice(&session.0.to_be_bytes());
    for p in participants {
        buf.extend_from_slice(&p.0.to_be_bytes());
    }
    buf
}

impl ThresholdScheme for ReferenceLatticeScheme {
    type Share = ReferenceShare;
    type GroupKey = ReferenceGroupKey;
    type Signature = ReferenceSignature;
    type Round1 = ReferenceRound1;
    type Round2 = ReferenceRound2;
    type Signer = ReferenceSigner;

    fn generate_keys<R: RngCore + CryptoRng>(
        t: u32,
        n: u32,
        rng: &mut R,
    ) -> Result<(Vec<Self::Share>, Self::GroupKey), ThresholdError> {
        if n == 0 || t >= n {
            return Err(ThresholdError::KeygenFailure(format!(
                "invalid threshold parameters: t={t}, n={n}"
            )));
        }
        let q = math::order();
        // Degree-t polynomial: t+1 coefficients, a_0 is the secret.
        let degree = t as usize;
        let mut coeffs = Vec::with_capacity(degree + 1);
        for _ in 0..=degree {
            coeffs.push(random_scalar(rng, &q));
        }
        let secret = coeffs[0].clone();
        let group_key = math::group_gen_pow(&secret);

        let mut shares = Vec::with_capacity(n as usize);
        for i in 1..=n {
            let x = BigUint::from(i);
            let y = evaluate_polynomial(&coeffs, &x);
            shares.push(ReferenceShare { index: i, secret_share: y, group_key: group_key.clone() });
        }
        Ok((shares, ReferenceGroupKey(group_key)))
    }

    fn new_signer(share: Self::Share) -> Self::Signer {
        ReferenceSigner { share }
    }

    fn verify(group_key: &Self::GroupKey, msg: &[u8], sig: &Self::Signature) -> bool {
        let c = challenge(&sig.r, msg, &group_key.0);
        let lhs = math::group_gen_pow(&sig.s);
        let rhs = math::group_mul(&sig.r, &math::group_pow(&group_key.0, &c));
        lhs == rhs
    }
}

fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R, modulus: &BigUint) -> BigUint {
    let bytes_needed = (modulus.bits() as usize + 7) / 8 + 8;
    let mut buf = vec![0u8; bytes_needed];
    rng.fill_bytes(&mut buf);
    BigUint::from_bytes_be(&buf) % modulus
}

fn evaluate_polynomial(coeffs: &[BigUint], x: &BigUint) -> BigUint {
    let q = math::order();
    let mut acc = BigUint::zero();
    for c in coeffs.iter().rev() {
        acc = (acc * x + c) % &q;
    }
    acc
}

fn challenge(r: &BigUint, msg: &[u8], group_key: &BigUint) -> BigUint {
    let r_bytes = math::biguint_to_32_bytes(r);
    let y_bytes = math::biguint_to_32_bytes(group_key);
    math::hash_to_scalar(b"qs-threshold/challenge", &[&r_bytes, msg, &y_bytes])
}

impl ThresholdSigner<ReferenceLatticeScheme> for ReferenceSigner {
    fn round1(
        &self,
        session: SessionId,
        prf_key: &PrfKey,
        participants: &[PartyIndex],
    ) -> Result<ReferenceRound1, ThresholdError> {
        let domain = domain_bytes(session, participants);
        let nonce =
            math::derive_nonce(&prf_key.0, b"round1", &[&domain, &self.share.index.to_be_bytes()]);
        let commitment = math::group_gen_pow(&nonce);
        Ok(ReferenceRound1 { party: self.share.index, commitment })
    }

    fn round2(
        &self,
        session: SessionId,
        msg: &[u8],
        prf_key: &PrfKey,
        participants: &[PartyIndex],
        round1_map: &BTreeMap<PartyIndex, ReferenceRound1>,
    ) -> Result<ReferenceRound2, ThresholdError> {
        let my_index = PartyIndex(self.share.index);
        if !participants.contains(&my_index) {
            return Err(ThresholdError::Round2Failure {
                party: self.share.index,
                reason: "signer is not among the participants".into(),
            });
        }

        let domain = domain_bytes(session, participants);
        let nonce =
            math::derive_nonce(&prf_key.0, b"round1", &[&domain, &self.share.index.to_be_bytes()]);
        let my_commitment = math::group_gen_pow(&nonce);

        let received = round1_map
            .get(&my_index)
            .ok_or(ThresholdError::MissingRoundData(self.share.index))?;
        if received.commitment != my_commitment {
            return Err(ThresholdError::Round2Failure {
                party: self.share.index,
                reason: "round1 commitment does not match recomputed nonce".into(),
            });
        }

        let all_indices: Vec<u32> = participants.iter().map(|p| p.0).collect();
        let mut r_agg = BigUint::one();
        for idx in &all_indices {
            let r1 = round1_map
                .get(&PartyIndex(*idx))
                .ok_or(ThresholdError::MissingRoundData(*idx))?;
            r_agg = math::group_mul(&r_agg, &r1.commitment);
        }

        let c = challenge(&r_agg, msg, &self.share.group_key);
        let lambda = math::lagrange_coefficient_at_zero(self.share.index, &all_indices);
        let response = math::scalar_add(&nonce, &math::scalar_mul(&c, &math::scalar_mul(&lambda, &self.share.secret_share)));

        Ok(ReferenceRound2 { party: self.share.index, commitment: my_commitment, response })
    }

    fn finalize(
        &self,
        participants: &[PartyIndex],
        round2_map: &BTreeMap<PartyIndex, ReferenceRound2>,
    ) -> Result<ReferenceSignature, ThresholdError> {
        if round2_map.len() != participants.len() {
            return Err(ThresholdError::FinalizeFailure(format!(
                "expected {} round2 contributions, got {}",
                participants.len(),
                round2_map.len()
            )));
        }

        let mut r_agg = BigUint::one();
        let mut s_agg = BigUint::zero();
        for p in participants {
            let contribution = round2_map.get(p).ok_or(ThresholdError::MissingRoundData(p.0))?;
            r_agg = math::group_mul(&r_agg, &contribution.commitment);
            s_agg = math::scalar_add(&s_agg, &contribution.response);
        }

        Ok(ReferenceSignature { r: r_agg, s: s_agg })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn run_ceremony(
        t: u32,
        n: u32,
        signers_idx: &[u32],
        session: SessionId,
        msg: &[u8],
    ) -> (ReferenceGroupKey, ReferenceSignature) {
        let mut rng = StdRng::seed_from_u64(42);
        let (shares, group_key) = ReferenceLatticeScheme::generate_keys(t, n, &mut rng).unwrap();
        let prf_key = PrfKey([7u8; 32]);
        let participants: Vec<PartyIndex> = signers_idx.iter().map(|i| PartyIndex(*i)).collect();

        let signers: Vec<ReferenceSigner> = signers_idx
            .iter()
            .map(|i| ReferenceLatticeScheme::new_signer(shares[(*i - 1) as usize].clone()))
            .collect();

        let mut round1_map = std::collections::BTreeMap::new();
        for (signer, idx) in signers.iter().zip(signers_idx) {
            let r1 = signer.round1(session, &prf_key, &participants).unwrap();
            round1_map.insert(PartyIndex(*idx), r1);
        }

        let mut round2_map = std::collections::BTreeMap::new();
        for (signer, idx) in signers.iter().zip(signers_idx) {
            let r2 = signer.round2(session, msg, &prf_key, &participants, &round1_map).unwrap();
            round2_map.insert(PartyIndex(*idx), r2);
        }

        let sig = signers[0].finalize(&participants, &round2_map).unwrap();
        (group_key, sig)
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (group_key, sig) = run_ceremony(2, 5, &[1, 2, 3, 4], SessionId(1), b"hello world");
        assert!(ReferenceLatticeScheme::verify(&group_key, b"hello world", &sig));
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let (group_key, sig) = run_ceremony(2, 5, &[1, 2, 3, 4], SessionId(1), b"hello world");
        assert!(!ReferenceLatticeScheme::verify(&group_key, b"goodbye world", &sig));
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let (group_key, mut sig) = run_ceremony(2, 5, &[1, 2, 3, 4], SessionId(1), b"hello world");
        sig.s += BigUint::one();
        assert!(!ReferenceLatticeScheme::verify(&group_key, b"hello world", &sig));
    }

    #[test]
    fn deterministic_given_same_session_and_prf_key() {
        let (_, sig_a) = run_ceremony(2, 5, &[1, 2, 3, 4], SessionId(9), b"msg");
        let (_, sig_b) = run_ceremony(2, 5, &[1, 2, 3, 4], SessionId(9), b"msg");
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn different_qualified_subsets_reconstruct_same_signature() {
        let (group_key, sig) = run_ceremony(2, 5, &[1, 2, 4, 5], SessionId(3), b"subset");
        assert!(ReferenceLatticeScheme::verify(&group_key, b"subset", &sig));
    }
}
