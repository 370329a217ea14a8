use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Identifies a single run of the two-round signing protocol. Callers are
/// responsible for uniqueness per (epoch, bundle-or-checkpoint) — see
/// spec.md §4.3's caller contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Shared randomness used to derive per-session nonces. Held only by
/// participants of a ceremony, never persisted past its use.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct PrfKey(pub [u8; 32]);

impl std::fmt::Debug for PrfKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrfKey").field(&"..").finish()
    }
}

/// 1-indexed position of a signer within its group's party list. Using a
/// dedicated type (rather than a bare `u32`) prevents mixing it up with
/// `SessionId` or validator-facing indices at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartyIndex(pub u32);

impl std::fmt::Display for PartyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "party-{}", self.0)
    }
}
