use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use qs_threshold::{PartyIndex, PrfKey, SessionId, ThresholdScheme};

use crate::cancellation::CancellationToken;
use crate::epoch::EpochManager;
use crate::errors::{EpochError, GroupFailure, GroupedError};
use crate::metrics::EngineMetrics;
use crate::types::ValidatorId;

use super::model::{GroupIndex, GroupedConfig, GroupedSignature, ValidatorGroup};
use super::protocol::run_two_round_ceremony;
use super::sharding::{partition_into_groups, seeded_shuffle};

/// Intra-group threshold as a function of the group's actual size (a
/// trailing group may be smaller than `DefaultGroupSize`): `ceil(2g/3)`,
/// clamped so it always stays below `g` (spec.md §4.2).
fn group_threshold(group_len: usize) -> u32 {
    if group_len == 0 {
        return 0;
    }
    let ceil = (2 * group_len + 2) / 3;
    ceil.min(group_len.saturating_sub(1).max(0)) as u32
}

/// Number of groups that must sign for a grouped signature to be accepted:
/// `floor(num_groups * numerator / denominator)`, clamped to at least 1
/// (spec.md §4.2; numerator/denominator are the operator-tunable
/// `Settings::group_quorum_numerator`/`group_quorum_denominator`, spec.md
/// §6 — "configuration, not invariants").
fn compute_quorum(num_groups: usize, numerator: u64, denominator: u64) -> usize {
    if denominator == 0 {
        return num_groups.max(1);
    }
    (((num_groups as u64) * numerator) / denominator).max(1) as usize
}

fn build_groups<T: ThresholdScheme>(
    epoch: u64,
    validators: &[ValidatorId],
    seed: &[u8],
    group_size: usize,
    quorum_numerator: u64,
    quorum_denominator: u64,
) -> Result<GroupedConfig<T>, GroupedError> {
    let shuffled = seeded_shuffle(validators, seed);
    let chunks = partition_into_groups(&shuffled, group_size);
    let mut rng = StdRng::from_entropy();

    let mut groups = Vec::with_capacity(chunks.len());
    let mut validator_to_group = BTreeMap::new();
    for (i, chunk) in chunks.into_iter().enumerate() {
        let t_g = group_threshold(chunk.len());
        let (shares, group_key) = T::generate_keys(t_g, chunk.len() as u32, &mut rng)
            .map_err(|e| GroupedError::Epoch(EpochError::KeygenFailure(e.to_string())))?;
        let index = GroupIndex(i);
        for v in &chunk {
            validator_to_group.insert(v.clone(), index);
        }
        let shares_map = chunk.iter().cloned().zip(shares).collect();
        groups.push(ValidatorGroup { index, validators: chunk, threshold: t_g, group_key, shares: shares_map });
    }

    let quorum = compute_quorum(groups.len(), quorum_numerator, quorum_denominator);
    Ok(GroupedConfig { epoch, groups, quorum, validator_to_group })
}

fn build_fallback_group<T: ThresholdScheme>(
    epoch: u64,
    validators: &[ValidatorId],
) -> Result<GroupedConfig<T>, GroupedError> {
    let t = (validators.len() as u32).saturating_sub(1).max(1);
    let mut rng = StdRng::from_entropy();
    let (shares, group_key) = T::generate_keys(t, validators.len() as u32, &mut rng)
        .map_err(|e| GroupedError::Epoch(EpochError::KeygenFailure(e.to_string())))?;

    let index = GroupIndex(0);
    let validator_to_group = validators.iter().cloned().map(|v| (v, index)).collect();
    let shares_map = validators.iter().cloned().zip(shares).collect();

    Ok(GroupedConfig {
        epoch,
        groups: vec![ValidatorGroup {
            index,
            validators: validators.to_vec(),
            threshold: t,
            group_key,
            shares: shares_map,
        }],
        quorum: 1,
        validator_to_group,
    })
}

fn shard_validators<T: ThresholdScheme>(
    epoch: u64,
    validators: &[ValidatorId],
    seed: &[u8],
    group_size: usize,
    quorum_numerator: u64,
    quorum_denominator: u64,
) -> Result<GroupedConfig<T>, GroupedError> {
    if validators.len() < group_size {
        build_fallback_group(epoch, validators)
    } else {
        build_groups(epoch, validators, seed, group_size, quorum_numerator, quorum_denominator)
    }
}

struct GroupedState<T: ThresholdScheme> {
    current: GroupedConfig<T>,
    history: BTreeMap<u64, GroupedConfig<T>>,
    history_limit: usize,
}

impl<T: ThresholdScheme> GroupedState<T> {
    fn prune(&mut self) {
        let floor = self.current.epoch.saturating_sub(self.history_limit as u64);
        self.history.retain(|&epoch, _| epoch >= floor);
    }
}

/// Component D: shards validators into small threshold groups and drives
/// parallel group signing (spec.md §4.2). Embeds an [`EpochManager`] purely
/// for epoch-number/rate-limit/history-timing bookkeeping — the actual
/// signing key material lives in this manager's own per-group state.
pub struct GroupedEpochManager<T: ThresholdScheme> {
    epoch_mgr: EpochManager<T>,
    group_size: usize,
    quorum_numerator: u64,
    quorum_denominator: u64,
    state: Arc<RwLock<GroupedState<T>>>,
    metrics: Arc<EngineMetrics>,
}

impl<T: ThresholdScheme> Clone for GroupedEpochManager<T> {
    fn clone(&self) -> Self {
        Self {
            epoch_mgr: self.epoch_mgr.clone(),
            group_size: self.group_size,
            quorum_numerator: self.quorum_numerator,
            quorum_denominator: self.quorum_denominator,
            state: self.state.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T: ThresholdScheme> GroupedEpochManager<T> {
    #[instrument(skip(validators, seed), fields(n = validators.len(), group_size))]
    pub async fn initialize_grouped(
        validators: Vec<ValidatorId>,
        seed: &[u8],
        group_size: usize,
        history_limit: usize,
        min_epoch_duration: Duration,
        max_epoch_duration: Duration,
        quorum_numerator: u64,
        quorum_denominator: u64,
    ) -> Result<Self, GroupedError> {
        let epoch_mgr = EpochManager::<T>::initialize(
            validators.clone(),
            1,
            history_limit,
            min_epoch_duration,
            max_epoch_duration,
        )
        .await?;

        let config = shard_validators::<T>(0, &validators, seed, group_size, quorum_numerator, quorum_denominator)?;
        info!(
            epoch = 0,
            groups = config.groups.len(),
            quorum = config.quorum,
            "grouped epoch manager initialized"
        );

        let mut history = BTreeMap::new();
        history.insert(0, config.clone());

        Ok(Self {
            epoch_mgr,
            group_size,
            quorum_numerator,
            quorum_denominator,
            state: Arc::new(RwLock::new(GroupedState { current: config, history, history_limit })),
            metrics: Arc::new(EngineMetrics::new()),
        })
    }

    /// Attaches a shared metrics sink for rotation/sign telemetry, in place
    /// of the private one created by [`Self::initialize_grouped`]. Used by
    /// the façade, which holds one [`EngineMetrics`] per running engine.
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    #[instrument(skip(self, validators, seed), fields(n = validators.len(), force))]
    pub async fn rotate_grouped(
        &self,
        validators: Vec<ValidatorId>,
        seed: &[u8],
        force: bool,
    ) -> Result<GroupedConfig<T>, GroupedError> {
        let rotated = self.epoch_mgr.rotate(validators.clone(), force).await?;
        let config = shard_validators::<T>(
            rotated.epoch,
            &validators,
            seed,
            self.group_size,
            self.quorum_numerator,
            self.quorum_denominator,
        )?;

        let mut state = self.state.write().await;
        let old = std::mem::replace(&mut state.current, config.clone());
        state.history.insert(old.epoch, old);
        state.history.insert(config.epoch, config.clone());
        state.prune();
        self.metrics.record_epoch_rotation(config.epoch);

        info!(epoch = config.epoch, groups = config.groups.len(), quorum = config.quorum, "rotated groups");
        Ok(config)
    }

    pub async fn get_validator_group(&self, validator: &ValidatorId) -> Result<GroupIndex, GroupedError> {
        let state = self.state.read().await;
        state
            .current
            .validator_to_group
            .get(validator)
            .copied()
            .ok_or(GroupedError::InvalidGroupAssignment)
    }

    pub async fn get_group_signer(
        &self,
        validator: &ValidatorId,
    ) -> Result<(T::Share, GroupIndex, PartyIndex), GroupedError> {
        let state = self.state.read().await;
        let index = state
            .current
            .validator_to_group
            .get(validator)
            .copied()
            .ok_or(GroupedError::InvalidGroupAssignment)?;
        let group = &state.current.groups[index.0];
        let share = group.shares.get(validator).cloned().ok_or(GroupedError::InvalidGroupAssignment)?;
        let party = group.party_index(validator).ok_or(GroupedError::InvalidGroupAssignment)?;
        Ok((share, index, PartyIndex(party)))
    }

    /// Concurrently runs the two-round protocol per group (spec.md §4.2,
    /// `ParallelGroupSign`). Per-group failures are collected rather than
    /// aborting the whole operation; the call only fails overall when fewer
    /// than `quorum` groups produced a signature.
    pub async fn parallel_group_sign(
        &self,
        session_id: u64,
        msg: &[u8],
        prf_key: &PrfKey,
        signers_by_group: BTreeMap<GroupIndex, Vec<ValidatorId>>,
        cancellation: &CancellationToken,
    ) -> Result<(GroupedSignature<T>, Vec<GroupFailure>), GroupedError> {
        if cancellation.is_cancelled() {
            return Err(GroupedError::Cancelled);
        }

        let (epoch, quorum, groups_by_index) = {
            let state = self.state.read().await;
            let groups_by_index: BTreeMap<GroupIndex, ValidatorGroup<T>> =
                state.current.groups.iter().map(|g| (g.index, g.clone())).collect();
            (state.current.epoch, state.current.quorum, groups_by_index)
        };

        let tasks = signers_by_group.into_iter().map(|(group_index, signer_ids)| {
            let msg = msg.to_vec();
            let prf_key = prf_key.clone();
            let group = groups_by_index.get(&group_index).cloned();
            async move {
                let outcome = sign_one_group::<T>(group, group_index, session_id, &msg, &prf_key, signer_ids).await;
                (group_index, outcome)
            }
        });

        // Suspension point (iii), spec.md §5: racing the join against the
        // token lets a caller abort the wait without the already-spawned
        // per-group futures continuing unobserved.
        let mut cancellation = cancellation.clone();
        let results = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(GroupedError::Cancelled),
            results = join_all(tasks) => results,
        };

        let mut group_signatures = BTreeMap::new();
        let mut signed_groups = Vec::new();
        let mut failures = Vec::new();
        for (group_index, outcome) in results {
            match outcome {
                Ok(sig) => {
                    group_signatures.insert(group_index, sig);
                    signed_groups.push(group_index);
                }
                Err(reason) => {
                    warn!(group = %group_index, %reason, "group failed to sign");
                    self.metrics.record_group_sign_failure();
                    failures.push(GroupFailure { group: group_index, reason });
                }
            }
        }
        signed_groups.sort();

        if signed_groups.len() < quorum {
            return Err(GroupedError::InsufficientGroups { observed: signed_groups.len(), required: quorum });
        }

        Ok((
            GroupedSignature { epoch, message: msg.to_vec(), group_signatures, signed_groups },
            failures,
        ))
    }

    /// Verifies a grouped signature: rejects if fewer than `quorum` groups
    /// signed, then counts how many signed groups verify against that
    /// epoch's group key (spec.md §4.2, `VerifyGroupedSignature`).
    pub async fn verify_grouped_signature(&self, gs: &GroupedSignature<T>) -> Result<bool, GroupedError> {
        let state = self.state.read().await;
        let config = if gs.epoch == state.current.epoch {
            &state.current
        } else {
            state.history.get(&gs.epoch).ok_or(GroupedError::Epoch(EpochError::EpochNotFound(gs.epoch)))?
        };

        if gs.group_signatures.len() < config.quorum {
            return Ok(false);
        }

        let mut valid = 0usize;
        for group in &config.groups {
            if let Some(sig) = gs.group_signatures.get(&group.index) {
                if T::verify(&group.group_key, &gs.message, sig) {
                    valid += 1;
                }
            }
        }
        Ok(valid >= config.quorum)
    }

    pub async fn current_config(&self) -> GroupedConfig<T> {
        self.state.read().await.current.clone()
    }

    pub async fn current_epoch(&self) -> u64 {
        self.epoch_mgr.current_epoch().await
    }

    pub async fn time_until_next_rotation(&self) -> Duration {
        self.epoch_mgr.time_until_next_rotation().await
    }

    pub async fn force_rotate_if_expired(&self, seed: &[u8]) -> Option<GroupedConfig<T>> {
        let expired = self.epoch_mgr.force_rotate_if_expired().await?;
        let config = shard_validators::<T>(
            expired.epoch,
            &expired.validators,
            seed,
            self.group_size,
            self.quorum_numerator,
            self.quorum_denominator,
        )
        .ok()?;
        let mut state = self.state.write().await;
        let old = std::mem::replace(&mut state.current, config.clone());
        state.history.insert(old.epoch, old);
        state.history.insert(config.epoch, config.clone());
        state.prune();
        self.metrics.record_epoch_rotation(config.epoch);
        Some(config)
    }
}

async fn sign_one_group<T: ThresholdScheme>(
    group: Option<ValidatorGroup<T>>,
    group_index: GroupIndex,
    session_id: u64,
    msg: &[u8],
    prf_key: &PrfKey,
    signer_ids: Vec<ValidatorId>,
) -> Result<T::Signature, String> {
    let group = group.ok_or_else(|| format!("no such group: {group_index}"))?;

    let mut participants = Vec::with_capacity(signer_ids.len());
    for id in &signer_ids {
        let share = group.shares.get(id).cloned().ok_or_else(|| format!("{id} is not a member of {group_index}"))?;
        let party = group
            .party_index(id)
            .ok_or_else(|| format!("{id} has no party index in {group_index}"))?;
        participants.push((id.clone(), PartyIndex(party), share));
    }
    participants.sort_by_key(|(_, idx, _)| *idx);

    run_two_round_ceremony::<T>(SessionId(session_id), msg, prf_key, &participants, group.threshold)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qs_threshold::ReferenceLatticeScheme;
    use sha2::{Digest, Sha256};

    fn validators(n: usize) -> Vec<ValidatorId> {
        (0..n).map(|i| ValidatorId(format!("v{i}"))).collect()
    }

    fn seed(label: &str) -> Vec<u8> {
        Sha256::digest(label.as_bytes()).to_vec()
    }

    #[tokio::test(start_paused = true)]
    async fn small_set_falls_back_to_one_group() {
        let mgr = GroupedEpochManager::<ReferenceLatticeScheme>::initialize_grouped(
            validators(3),
            &seed("epoch-0"),
            5,
            3,
            Duration::from_secs(600),
            Duration::from_secs(3600),
            2,
            3,
        )
        .await
        .unwrap();

        let config = mgr.current_config().await;
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.quorum, 1);
        assert_eq!(config.groups[0].validators.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn large_set_shards_into_expected_groups_and_quorum() {
        let mgr = GroupedEpochManager::<ReferenceLatticeScheme>::initialize_grouped(
            validators(99),
            &seed("epoch-0-seed"),
            3,
            6,
            Duration::from_secs(600),
            Duration::from_secs(3600),
            2,
            3,
        )
        .await
        .unwrap();

        let config = mgr.current_config().await;
        assert_eq!(config.groups.len(), 33);
        assert_eq!(config.quorum, 22);
    }

    #[tokio::test(start_paused = true)]
    async fn assignment_is_deterministic_across_independent_managers() {
        let vs = validators(12);
        let s = seed("reproducible-seed");

        let a = GroupedEpochManager::<ReferenceLatticeScheme>::initialize_grouped(
            vs.clone(),
            &s,
            3,
            6,
            Duration::from_secs(600),
            Duration::from_secs(3600),
            2,
            3,
        )
        .await
        .unwrap();
        let b = GroupedEpochManager::<ReferenceLatticeScheme>::initialize_grouped(
            vs.clone(),
            &s,
            3,
            6,
            Duration::from_secs(600),
            Duration::from_secs(3600),
            2,
            3,
        )
        .await
        .unwrap();

        for v in &vs {
            assert_eq!(a.get_validator_group(v).await.unwrap(), b.get_validator_group(v).await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_sign_succeeds_with_full_participation() {
        let mgr = GroupedEpochManager::<ReferenceLatticeScheme>::initialize_grouped(
            validators(9),
            &seed("epoch-0"),
            3,
            6,
            Duration::from_secs(600),
            Duration::from_secs(3600),
            2,
            3,
        )
        .await
        .unwrap();

        let config = mgr.current_config().await;
        let mut signers_by_group = BTreeMap::new();
        for group in &config.groups {
            signers_by_group.insert(group.index, group.validators.clone());
        }

        let prf_key = PrfKey([3u8; 32]);
        let (_source, cancellation) = crate::cancellation::new_pair();
        let (gs, failures) =
            mgr.parallel_group_sign(1, b"bundle-message", &prf_key, signers_by_group, &cancellation).await.unwrap();

        assert!(failures.is_empty());
        assert!(mgr.verify_grouped_signature(&gs).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_sign_fails_when_quorum_unreachable() {
        let mgr = GroupedEpochManager::<ReferenceLatticeScheme>::initialize_grouped(
            validators(9),
            &seed("epoch-0"),
            3,
            6,
            Duration::from_secs(600),
            Duration::from_secs(3600),
            2,
            3,
        )
        .await
        .unwrap();

        let config = mgr.current_config().await;
        let mut signers_by_group = BTreeMap::new();
        signers_by_group.insert(config.groups[0].index, config.groups[0].validators.clone());

        let prf_key = PrfKey([3u8; 32]);
        let (_source, cancellation) = crate::cancellation::new_pair();
        let err =
            mgr.parallel_group_sign(1, b"bundle-message", &prf_key, signers_by_group, &cancellation).await.unwrap_err();
        assert_eq!(err, GroupedError::InsufficientGroups { observed: 1, required: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_sign_rejects_when_already_cancelled() {
        let mgr = GroupedEpochManager::<ReferenceLatticeScheme>::initialize_grouped(
            validators(9),
            &seed("epoch-0"),
            3,
            6,
            Duration::from_secs(600),
            Duration::from_secs(3600),
            2,
            3,
        )
        .await
        .unwrap();

        let config = mgr.current_config().await;
        let mut signers_by_group = BTreeMap::new();
        for group in &config.groups {
            signers_by_group.insert(group.index, group.validators.clone());
        }

        let prf_key = PrfKey([3u8; 32]);
        let (source, cancellation) = crate::cancellation::new_pair();
        source.cancel();
        let err =
            mgr.parallel_group_sign(1, b"bundle-message", &prf_key, signers_by_group, &cancellation).await.unwrap_err();
        assert_eq!(err, GroupedError::Cancelled);
    }
}
