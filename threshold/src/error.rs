use thiserror::Error;

/// Failures surfaced by a [`crate::ThresholdScheme`] implementation.
///
/// These map to the "library-layer" failures spec.md treats as opaque: the
/// coordination code above this crate (the grouped threshold manager) is
/// responsible for deciding whether a failure here is fatal to the overall
/// signing operation or can be tolerated because quorum is still reachable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("key generation failed: {0}")]
    KeygenFailure(String),

    #[error("round 1 failed for party {party}: {reason}")]
    Round1Failure { party: u32, reason: String },

    #[error("round 2 failed for party {party}: {reason}")]
    Round2Failure { party: u32, reason: String },

    #[error("finalize failed: {0}")]
    FinalizeFailure(String),

    #[error("not enough participants: have {have}, need at least {need}")]
    NotEnoughParticipants { have: usize, need: usize },

    #[error("participant set is not sorted or contains duplicates")]
    UnsortedParticipants,

    #[error("missing round data from party {0}")]
    MissingRoundData(u32),
}
