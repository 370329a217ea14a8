//! Drives a single run of the two-round threshold signing protocol
//! (spec.md §4.3) over one group's participants, in-process. A real
//! deployment exchanges `Round1`/`Round2` data over the network, one
//! message per participant pair; this engine, like the teacher's test
//! helpers for its multisig ceremonies, simulates every local participant
//! in one process and wires the rounds together directly.

use std::collections::BTreeMap;

use qs_threshold::{PartyIndex, PrfKey, SessionId, ThresholdError, ThresholdScheme, ThresholdSigner};

use crate::types::ValidatorId;

/// Runs commit → respond → finalize for one group and returns the
/// resulting signature. `participants` must already be sorted by party
/// index (spec.md §4.3's caller contract) and `shares` must contain an
/// entry for every participant. `threshold` is the group's own configured
/// `t_g` ([`super::model::ValidatorGroup::threshold`]) — the participant
/// set must contain at least `threshold + 1` signers, independent of
/// however many happened to be passed in.
pub fn run_two_round_ceremony<T: ThresholdScheme>(
    session: SessionId,
    msg: &[u8],
    prf_key: &PrfKey,
    participants: &[(ValidatorId, PartyIndex, T::Share)],
    threshold: u32,
) -> Result<T::Signature, ThresholdError> {
    let party_indices: Vec<PartyIndex> = participants.iter().map(|(_, idx, _)| *idx).collect();
    qs_threshold::check_participants(&party_indices, threshold)?;

    let signers: Vec<(PartyIndex, T::Signer)> = participants
        .iter()
        .map(|(_, idx, share)| (*idx, T::new_signer(share.clone())))
        .collect();

    let mut round1_map: BTreeMap<PartyIndex, T::Round1> = BTreeMap::new();
    for (idx, signer) in &signers {
        let r1 = signer.round1(session, prf_key, &party_indices)?;
        round1_map.insert(*idx, r1);
    }

    let mut round2_map: BTreeMap<PartyIndex, T::Round2> = BTreeMap::new();
    for (idx, signer) in &signers {
        let r2 = signer.round2(session, msg, prf_key, &party_indices, &round1_map)?;
        round2_map.insert(*idx, r2);
    }

    let (_, finalizer) = signers.first().ok_or(ThresholdError::NotEnoughParticipants {
        have: 0,
        need: 1,
    })?;
    finalizer.finalize(&party_indices, &round2_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qs_threshold::ReferenceLatticeScheme;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn ceremony_produces_a_verifiable_signature() {
        let mut rng = StdRng::seed_from_u64(7);
        let (shares, group_key) = ReferenceLatticeScheme::generate_keys(2, 4, &mut rng).unwrap();
        let prf_key = PrfKey([1u8; 32]);

        let participants: Vec<(ValidatorId, PartyIndex, _)> = shares
            .into_iter()
            .enumerate()
            .map(|(i, share)| (ValidatorId(format!("v{i}")), PartyIndex(i as u32 + 1), share))
            .collect();

        let sig =
            run_two_round_ceremony::<ReferenceLatticeScheme>(SessionId(1), b"hello", &prf_key, &participants, 2)
                .unwrap();

        assert!(ReferenceLatticeScheme::verify(&group_key, b"hello", &sig));
    }

    #[test]
    fn rejects_fewer_than_threshold_plus_one_participants() {
        let mut rng = StdRng::seed_from_u64(7);
        let (shares, _group_key) = ReferenceLatticeScheme::generate_keys(2, 4, &mut rng).unwrap();
        let prf_key = PrfKey([1u8; 32]);

        // threshold 2 needs at least 3 participants; only pass 2.
        let participants: Vec<(ValidatorId, PartyIndex, _)> = shares
            .into_iter()
            .take(2)
            .enumerate()
            .map(|(i, share)| (ValidatorId(format!("v{i}")), PartyIndex(i as u32 + 1), share))
            .collect();

        let err =
            run_two_round_ceremony::<ReferenceLatticeScheme>(SessionId(1), b"hello", &prf_key, &participants, 2)
                .unwrap_err();
        assert!(matches!(err, ThresholdError::NotEnoughParticipants { have: 2, need: 3 }));
    }
}
