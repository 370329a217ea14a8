//! Black-box lattice threshold-signature contract.
//!
//! This crate defines the trait boundary spec.md §6 calls the "external
//! library contracts" for threshold signing (`GenerateKeys`, `Signer`,
//! `Round1`, `Round2`, `Finalize`, `Verify`) and provides one reference
//! implementation for development and tests. Production deployments swap in
//! an actual lattice scheme behind [`ThresholdScheme`] — this crate never
//! implements NTT, Gaussian sampling, or any other lattice primitive itself.

mod error;
mod reference;
mod scheme;
mod session;

pub use error::ThresholdError;
pub use reference::{
    ReferenceGroupKey, ReferenceLatticeScheme, ReferenceRound1, ReferenceRound2, ReferenceShare,
    ReferenceSignature, ReferenceSigner,
};
pub use scheme::{check_participants, ThresholdScheme, ThresholdSigner};
pub use session::{PartyIndex, PrfKey, SessionId};
