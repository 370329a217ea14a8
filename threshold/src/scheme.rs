use std::collections::BTreeMap;
use std::fmt::Debug;

use rand::{CryptoRng, RngCore};

use crate::error::ThresholdError;
use crate::session::{PartyIndex, PrfKey, SessionId};

/// The black-box lattice threshold-signature contract consumed by the
/// grouped threshold manager (spec.md §6, "External library contracts").
///
/// This engine never implements lattice primitives (NTT, Gaussian sampling)
/// itself — an implementation of this trait is a library dependency. The one
/// implementation in this crate, [`crate::reference::ReferenceLatticeScheme`],
/// is a simplified discrete-log-based stand-in suitable for exercising the
/// coordination logic in tests; it is not a post-quantum scheme.
pub trait ThresholdScheme: Clone + Send + Sync + 'static {
    /// A single party's secret key share, as produced by `generate_keys`.
    type Share: Clone + Debug + Send + Sync;
    /// The public key all participants share after keygen.
    type GroupKey: Clone + Debug + PartialEq + Send + Sync;
    /// A completed threshold signature.
    type Signature: Clone + Debug + PartialEq + Send + Sync;
    /// Data produced by round 1 (commit) and exchanged between participants.
    type Round1: Clone + Debug + Send + Sync;
    /// Data produced by round 2 (respond) and exchanged between participants.
    type Round2: Clone + Debug + Send + Sync;
    /// Per-party signer, constructed from a key share.
    type Signer: ThresholdSigner<Self>;

    /// Generates `n` key shares and a group public key for a `t`-of-`n`
    /// threshold scheme. A black-box keygen primitive — this engine does not
    /// perform distributed key generation (spec.md §1 Non-goals).
    fn generate_keys<R: RngCore + CryptoRng>(
        t: u32,
        n: u32,
        rng: &mut R,
    ) -> Result<(Vec<Self::Share>, Self::GroupKey), ThresholdError>;

    /// Constructs a signer from a key share.
    fn new_signer(share: Self::Share) -> Self::Signer;

    /// Verifies a completed signature against the group public key.
    fn verify(group_key: &Self::GroupKey, msg: &[u8], sig: &Self::Signature) -> bool;
}

/// Per-party driver of the two-round protocol (spec.md §4.3).
///
/// Implementations must be deterministic given `(session, prf_key, inputs)`
/// — the same session replayed with the same participant set and PRF key
/// produces the same Round1/Round2 data and, ultimately, the same signature.
pub trait ThresholdSigner<S: ThresholdScheme + ?Sized>: Send + Sync {
    /// Round 1 (commit): produced independently by each participant from
    /// `(session, prf_key, participants)`.
    fn round1(
        &self,
        session: SessionId,
        prf_key: &PrfKey,
        participants: &[PartyIndex],
    ) -> Result<S::Round1, ThresholdError>;

    /// Round 2 (respond): consumes every participant's Round1 data plus the
    /// message being signed.
    fn round2(
        &self,
        session: SessionId,
        msg: &[u8],
        prf_key: &PrfKey,
        participants: &[PartyIndex],
        round1_map: &BTreeMap<PartyIndex, S::Round1>,
    ) -> Result<S::Round2, ThresholdError>;

    /// Finalize: any single participant may run this over the collected
    /// Round2 data to produce the group signature.
    fn finalize(
        &self,
        participants: &[PartyIndex],
        round2_map: &BTreeMap<PartyIndex, S::Round2>,
    ) -> Result<S::Signature, ThresholdError>;
}

/// Validates the caller contract from spec.md §4.3: `participating` must be
/// sorted and free of duplicates, and its size must be at least `t + 1`.
pub fn check_participants(
    participants: &[PartyIndex],
    threshold: u32,
) -> Result<(), ThresholdError> {
    if participants.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ThresholdError::UnsortedParticipants);
    }
    let need = threshold as usize + 1;
    if participants.len() < need {
        return Err(ThresholdError::NotEnoughParticipants { have: participants.len(), need });
    }
    Ok(())
}
