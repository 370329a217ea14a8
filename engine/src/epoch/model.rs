use std::collections::{BTreeMap, BTreeSet};

use tokio::time::Instant;

use qs_threshold::ThresholdScheme;

use crate::types::ValidatorId;

/// One epoch's key material (spec.md §3, "EpochKeys"). `T::Signer` is
/// intentionally not stored here — it's reconstructed on demand from a
/// share via [`qs_threshold::ThresholdScheme::new_signer`], since signer
/// state for most backends is cheap to rebuild and isn't required to be
/// `Clone` (this struct is cloned whenever it crosses the epoch manager's
/// lock boundary, per spec.md §5's "return clones" policy).
#[derive(Clone)]
pub struct EpochKeys<T: ThresholdScheme> {
    pub epoch: u64,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub validators: Vec<ValidatorId>,
    pub threshold: u32,
    pub party_count: u32,
    pub group_key: T::GroupKey,
    pub shares: BTreeMap<ValidatorId, T::Share>,
}

impl<T: ThresholdScheme> std::fmt::Debug for EpochKeys<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochKeys")
            .field("epoch", &self.epoch)
            .field("threshold", &self.threshold)
            .field("party_count", &self.party_count)
            .field("validators", &self.validators)
            .finish()
    }
}

impl<T: ThresholdScheme> EpochKeys<T> {
    pub fn validator_set(&self) -> BTreeSet<ValidatorId> {
        self.validators.iter().cloned().collect()
    }

    /// 1-based position of `validator` within this epoch's ordered
    /// validator list, used as the party index handed to the threshold
    /// scheme.
    pub fn party_index(&self, validator: &ValidatorId) -> Option<u32> {
        self.validators.iter().position(|v| v == validator).map(|idx| idx as u32 + 1)
    }
}

/// Bounded history of epochs (spec.md §3, "EpochHistory"): at most
/// `limit + 1` entries (the current epoch plus `limit` prior ones), with
/// the current epoch always retained.
#[derive(Clone)]
pub struct EpochHistory<T: ThresholdScheme> {
    entries: BTreeMap<u64, EpochKeys<T>>,
    limit: usize,
}

impl<T: ThresholdScheme> EpochHistory<T> {
    pub fn new(limit: usize) -> Self {
        Self { entries: BTreeMap::new(), limit }
    }

    pub fn insert(&mut self, keys: EpochKeys<T>) {
        self.entries.insert(keys.epoch, keys);
    }

    pub fn get(&self, epoch: u64) -> Option<&EpochKeys<T>> {
        self.entries.get(&epoch)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every epoch strictly older than `current - limit` (spec.md
    /// §4.1: "prunes history beyond H").
    pub fn prune(&mut self, current_epoch: u64) {
        let floor = current_epoch.saturating_sub(self.limit as u64);
        self.entries.retain(|&epoch, _| epoch >= floor);
    }

    pub fn epochs(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }
}
