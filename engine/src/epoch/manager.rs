use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use qs_threshold::ThresholdScheme;

use crate::errors::EpochError;
use crate::types::ValidatorId;

use super::model::{EpochHistory, EpochKeys};

struct EpochManagerState<T: ThresholdScheme> {
    current_epoch: u64,
    current: EpochKeys<T>,
    last_keygen: Instant,
    history: EpochHistory<T>,
    threshold: u32,
    min_epoch_duration: Duration,
    max_epoch_duration: Duration,
}

/// Single-group key lifecycle and rotation policy (spec.md §4.1). Owns its
/// `EpochKeys` exclusively; callers receive clones.
pub struct EpochManager<T: ThresholdScheme> {
    state: Arc<RwLock<EpochManagerState<T>>>,
    history_limit: usize,
}

impl<T: ThresholdScheme> Clone for EpochManager<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone(), history_limit: self.history_limit }
    }
}

fn validators_equal(a: &[ValidatorId], b: &[ValidatorId]) -> bool {
    let sa: BTreeSet<&ValidatorId> = a.iter().collect();
    let sb: BTreeSet<&ValidatorId> = b.iter().collect();
    sa == sb
}

impl<T: ThresholdScheme> EpochManager<T> {
    /// Generates epoch 0 for `validators` under global threshold `threshold`
    /// (spec.md §4.1 `Initialize`).
    #[instrument(skip(validators), fields(n = validators.len()))]
    pub async fn initialize(
        validators: Vec<ValidatorId>,
        threshold: u32,
        history_limit: usize,
        min_epoch_duration: Duration,
        max_epoch_duration: Duration,
    ) -> Result<Self, EpochError> {
        if validators.len() < 2 {
            return Err(EpochError::InvalidValidatorSet(format!(
                "need at least 2 validators, got {}",
                validators.len()
            )));
        }
        if threshold as usize >= validators.len() {
            return Err(EpochError::InvalidValidatorSet(format!(
                "threshold {threshold} must be < validator count {}",
                validators.len()
            )));
        }

        let keys = generate_epoch_keys::<T>(0, &validators, threshold, max_epoch_duration)?;
        let now = Instant::now();

        let mut history = EpochHistory::new(history_limit);
        history.insert(keys.clone());

        info!(epoch = 0, validators = validators.len(), threshold, "epoch manager initialized");

        Ok(Self {
            state: Arc::new(RwLock::new(EpochManagerState {
                current_epoch: 0,
                current: keys,
                last_keygen: now,
                history,
                threshold,
                min_epoch_duration,
                max_epoch_duration,
            })),
            history_limit,
        })
    }

    /// Rotates to a new epoch for `validators` (spec.md §4.1 `Rotate`).
    #[instrument(skip(self, validators), fields(n = validators.len(), force))]
    pub async fn rotate(
        &self,
        validators: Vec<ValidatorId>,
        force: bool,
    ) -> Result<EpochKeys<T>, EpochError> {
        let mut state = self.state.write().await;

        let elapsed = state.last_keygen.elapsed();
        if elapsed < state.min_epoch_duration {
            return Err(EpochError::RateLimited { remaining: state.min_epoch_duration - elapsed });
        }

        if !force && validators_equal(&state.current.validators, &validators) {
            return Err(EpochError::NoValidatorChange);
        }

        let effective_threshold = if state.threshold as usize >= validators.len() {
            warn!(
                requested = state.threshold,
                validators = validators.len(),
                "capping threshold to validator_count - 1"
            );
            (validators.len() as u32).saturating_sub(1)
        } else {
            state.threshold
        };

        let new_epoch = state.current_epoch + 1;
        let keys =
            generate_epoch_keys::<T>(new_epoch, &validators, effective_threshold, state.max_epoch_duration)?;

        state.history.insert(keys.clone());
        state.current_epoch = new_epoch;
        state.current = keys.clone();
        state.last_keygen = Instant::now();
        state.history.prune(new_epoch);

        info!(epoch = new_epoch, validators = validators.len(), threshold = effective_threshold, "rotated epoch");

        Ok(keys)
    }

    /// Forces a rotation with the current validator set if the current
    /// epoch has expired (spec.md §4.1 `ForceRotateIfExpired`).
    pub async fn force_rotate_if_expired(&self) -> Option<EpochKeys<T>> {
        let validators = {
            let state = self.state.read().await;
            if Instant::now() <= state.current.expires_at {
                return None;
            }
            state.current.validators.clone()
        };
        self.rotate(validators, true).await.ok()
    }

    pub async fn get_epoch_keys(&self, epoch: u64) -> Result<EpochKeys<T>, EpochError> {
        let state = self.state.read().await;
        state.history.get(epoch).cloned().ok_or(EpochError::EpochNotFound(epoch))
    }

    pub async fn current_epoch_keys(&self) -> EpochKeys<T> {
        self.state.read().await.current.clone()
    }

    pub async fn current_epoch(&self) -> u64 {
        self.state.read().await.current_epoch
    }

    pub async fn verify_signature_for_epoch(
        &self,
        msg: &[u8],
        sig: &T::Signature,
        epoch: u64,
    ) -> Result<bool, EpochError> {
        let keys = self.get_epoch_keys(epoch).await?;
        Ok(T::verify(&keys.group_key, msg, sig))
    }

    pub async fn time_until_next_rotation(&self) -> Duration {
        let state = self.state.read().await;
        let elapsed = state.last_keygen.elapsed();
        state.min_epoch_duration.saturating_sub(elapsed)
    }

    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }
}

fn generate_epoch_keys<T: ThresholdScheme>(
    epoch: u64,
    validators: &[ValidatorId],
    threshold: u32,
    lifetime: Duration,
) -> Result<EpochKeys<T>, EpochError> {
    let mut rng = StdRng::from_entropy();
    let (shares, group_key) = T::generate_keys(threshold, validators.len() as u32, &mut rng)
        .map_err(|e| EpochError::KeygenFailure(e.to_string()))?;

    let shares = validators.iter().cloned().zip(shares).collect();
    let now = Instant::now();

    Ok(EpochKeys {
        epoch,
        created_at: now,
        expires_at: now + lifetime,
        validators: validators.to_vec(),
        threshold,
        party_count: validators.len() as u32,
        group_key,
        shares,
    })
}
