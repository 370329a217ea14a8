use std::collections::BTreeMap;

use qs_threshold::ThresholdScheme;

use crate::types::ValidatorId;

/// A shard's position among its epoch's groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupIndex(pub usize);

impl std::fmt::Display for GroupIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// A single shard of the validator set holding its own threshold keys
/// (spec.md §3, "ValidatorGroup").
#[derive(Clone)]
pub struct ValidatorGroup<T: ThresholdScheme> {
    pub index: GroupIndex,
    pub validators: Vec<ValidatorId>,
    pub threshold: u32,
    pub group_key: T::GroupKey,
    pub shares: BTreeMap<ValidatorId, T::Share>,
}

impl<T: ThresholdScheme> std::fmt::Debug for ValidatorGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorGroup")
            .field("index", &self.index)
            .field("validators", &self.validators)
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl<T: ThresholdScheme> ValidatorGroup<T> {
    pub fn party_index(&self, validator: &ValidatorId) -> Option<u32> {
        self.validators.iter().position(|v| v == validator).map(|i| i as u32 + 1)
    }
}

/// This epoch's full sharding: every group plus the quorum and the
/// validator → group lookup used by `GetValidatorGroup`/`GetGroupSigner`.
#[derive(Clone)]
pub struct GroupedConfig<T: ThresholdScheme> {
    pub epoch: u64,
    pub groups: Vec<ValidatorGroup<T>>,
    pub quorum: usize,
    pub validator_to_group: BTreeMap<ValidatorId, GroupIndex>,
}

/// A grouped threshold signature over a message: one lattice signature per
/// group that reached its internal threshold (spec.md §3,
/// "GroupedSignature"). Invariant: `signed_groups.len() >= quorum` once
/// accepted by [`super::GroupedEpochManager::verify_grouped_signature`].
#[derive(Clone)]
pub struct GroupedSignature<T: ThresholdScheme> {
    pub epoch: u64,
    pub message: Vec<u8>,
    pub group_signatures: BTreeMap<GroupIndex, T::Signature>,
    pub signed_groups: Vec<GroupIndex>,
}

impl<T: ThresholdScheme> std::fmt::Debug for GroupedSignature<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedSignature")
            .field("epoch", &self.epoch)
            .field("signed_groups", &self.signed_groups)
            .finish()
    }
}
