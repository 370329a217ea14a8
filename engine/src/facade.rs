//! Component G: wires C/D/E/F together behind `Start`/`Stop`/`Submit`/
//! `Verify`/`Stats`/`RotateEpoch` (spec.md §4.6).

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

use qs_threshold::{PrfKey, ThresholdScheme};

use crate::bundle::{BundlePipeline, BundleRunner, QuantumBundle};
use crate::cancellation::{new_pair, CancellationSource, CancellationToken};
use crate::consensus::{Block, ConsensusCore, ConsensusStats};
use crate::errors::{EngineError, GroupedError};
use crate::fastpath::{FastPathKeyring, FastPathScheme};
use crate::grouped::{GroupedConfig, GroupedEpochManager};
use crate::hash::Digest32;
use crate::metrics::EngineMetrics;
use crate::settings::Settings;
use crate::types::{ChainId, ValidatorId};

struct Running<T: ThresholdScheme, F: FastPathScheme> {
    grouped: Arc<GroupedEpochManager<T>>,
    bundle: Arc<BundlePipeline<T>>,
    consensus: Arc<ConsensusCore<F>>,
    cancellation_source: CancellationSource,
    bundle_runner_handle: JoinHandle<()>,
    finalizer_handle: JoinHandle<()>,
    relay_handle: JoinHandle<()>,
}

/// The top-level handle an embedding binary holds (spec.md §4.6). Generic
/// over the quantum-anchor threshold scheme `T` and the fast-path scheme
/// `F`, both black-box library contracts (spec.md §6).
pub struct Engine<T: ThresholdScheme, F: FastPathScheme> {
    settings: Settings,
    seed: Vec<u8>,
    metrics: Arc<EngineMetrics>,
    pending_validators: RwLock<Vec<ValidatorId>>,
    running: RwLock<Option<Running<T, F>>>,
}

/// `Stats` (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub quantum_height: u64,
    pub processed: u64,
    pub proofs: u64,
    pub chains: usize,
}

impl<T: ThresholdScheme, F: FastPathScheme> Engine<T, F> {
    pub fn new(settings: Settings, seed: impl Into<Vec<u8>>) -> Self {
        Self {
            settings,
            seed: seed.into(),
            metrics: Arc::new(EngineMetrics::new()),
            pending_validators: RwLock::new(Vec::new()),
            running: RwLock::new(None),
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    /// `AddValidator(id, stake)` (spec.md §8, scenario 2). Stake isn't part
    /// of the core data model (validator-set discovery/staking is an
    /// explicit spec.md Non-goal); it's accepted and otherwise unused, for
    /// compatibility with callers that track it themselves.
    pub async fn add_validator(&self, id: ValidatorId, _stake: u64) {
        let mut pending = self.pending_validators.write().await;
        if !pending.contains(&id) {
            pending.push(id);
        }
    }

    pub async fn registered_validators(&self) -> Vec<ValidatorId> {
        self.pending_validators.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.running.read().await.is_some()
    }

    /// `Start` (spec.md §4.6): boots the grouped epoch manager, the
    /// consensus core's per-chain workers, the bundle runner ticker, and
    /// the quantum-epoch finalizer ticker.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.is_running().await {
            return Ok(());
        }

        let validators = self.pending_validators.read().await.clone();
        let (cancellation_source, cancellation) = new_pair();

        let grouped = Arc::new(
            GroupedEpochManager::<T>::initialize_grouped(
                validators.clone(),
                &self.seed,
                self.settings.default_group_size,
                self.settings.history_limit,
                self.settings.min_epoch_duration(),
                self.settings.max_epoch_duration(),
                self.settings.group_quorum_numerator,
                self.settings.group_quorum_denominator,
            )
            .await?
            .with_metrics(self.metrics.clone()),
        );

        let mut rng = StdRng::from_entropy();
        let fastpath = Arc::new(FastPathKeyring::<F>::generate(&validators, &mut rng));
        let (finalized_tx, finalized_rx) = async_channel::unbounded();

        let consensus = ConsensusCore::<F>::new(
            fastpath,
            self.settings.chain_buffer_capacity,
            self.metrics.clone(),
            cancellation.clone(),
            finalized_tx,
        );
        consensus.start();

        let bundle = Arc::new(BundlePipeline::new(
            grouped.clone(),
            self.settings.bundle_signable_magic.clone(),
            self.settings.signed_bundle_channel_capacity,
            self.metrics.clone(),
        ));

        let relay_bundle = bundle.clone();
        let relay_handle = tokio::spawn(async move {
            while let Ok((height, hash)) = finalized_rx.recv().await {
                relay_bundle.add_block(height, hash);
            }
        });

        let mut prf_key_bytes = [0u8; 32];
        rng.fill_bytes(&mut prf_key_bytes);
        let runner = Arc::new(BundleRunner::new(
            bundle.clone(),
            self.settings.quantum_checkpoint_interval(),
            PrfKey(prf_key_bytes),
            cancellation.clone(),
        ));
        let bundle_runner_handle = runner.spawn();

        let finalizer_consensus = consensus.clone();
        let mut finalizer_cancellation = cancellation.clone();
        let finalizer_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => finalizer_consensus.finalizer_tick().await,
                    _ = finalizer_cancellation.cancelled() => break,
                }
            }
        });

        *self.running.write().await = Some(Running {
            grouped,
            bundle,
            consensus,
            cancellation_source,
            bundle_runner_handle,
            finalizer_handle,
            relay_handle,
        });

        info!(validators = validators.len(), "engine started");
        Ok(())
    }

    /// `Stop` (spec.md §4.6): cancels the root token and awaits every
    /// background task before returning.
    pub async fn stop(&self) {
        let Some(running) = self.running.write().await.take() else {
            return;
        };
        running.consensus.stop();
        running.cancellation_source.cancel();
        let _ = running.bundle_runner_handle.await;
        running.bundle.join_signing().await;
        let _ = running.finalizer_handle.await;
        running.relay_handle.abort();
        info!("engine stopped");
    }

    pub async fn submit(&self, chain: ChainId, block: Block) -> Result<(), EngineError> {
        let running = self.running.read().await;
        let running = running.as_ref().ok_or(EngineError::NotRunning)?;
        running.consensus.submit(chain, block).await
    }

    pub async fn verify(&self, hash: &Digest32) -> bool {
        let Some(running) = self.running.read().await.as_ref().map(|r| r.consensus.clone()) else {
            return false;
        };
        running.verify(hash).await
    }

    pub async fn registered_chains(&self) -> Vec<ChainId> {
        match self.running.read().await.as_ref() {
            Some(running) => running.consensus.registered_chains().await,
            None => Vec::new(),
        }
    }

    pub async fn verify_bundle(&self, bundle: &QuantumBundle<T>) -> bool {
        match self.running.read().await.as_ref() {
            Some(running) => running.bundle.verify_bundle(bundle).await,
            None => false,
        }
    }

    pub async fn signed_bundles(&self) -> Option<async_channel::Receiver<QuantumBundle<T>>> {
        self.running.read().await.as_ref().map(|r| r.bundle.signed_bundles())
    }

    pub async fn stats(&self) -> EngineStats {
        match self.running.read().await.as_ref() {
            Some(running) => {
                let ConsensusStats { quantum_height, processed, proofs, chains } = running.consensus.stats().await;
                EngineStats { quantum_height, processed, proofs, chains }
            }
            None => EngineStats { quantum_height: 0, processed: 0, proofs: 0, chains: 0 },
        }
    }

    /// `RotateEpoch(validators, force?)` (spec.md §6): flows into the
    /// grouped epoch manager (C embedded in D). `GroupedError::Epoch` is
    /// flattened straight through to `EngineError::Epoch` rather than
    /// wrapped in `EngineError::Grouped` — callers asking "was this
    /// rate-limited" (spec.md §7's `RateLimited`/`NoValidatorChange`/
    /// `InvalidValidatorSet`/`EpochNotFound`) shouldn't have to match
    /// through an extra `Grouped` layer for errors that originate in the
    /// embedded epoch manager, not in the sharding/quorum logic itself.
    pub async fn rotate_epoch(&self, validators: Vec<ValidatorId>, force: bool) -> Result<GroupedConfig<T>, EngineError> {
        let running = self.running.read().await;
        let running = running.as_ref().ok_or(EngineError::NotRunning)?;
        running.grouped.rotate_grouped(validators, &self.seed, force).await.map_err(|err| match err {
            GroupedError::Epoch(epoch_err) => EngineError::Epoch(epoch_err),
            other => EngineError::Grouped(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use qs_threshold::ReferenceLatticeScheme;

    use super::*;
    use crate::fastpath::Ed25519FastPath;
    use crate::types::BlockId;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.min_epoch_duration_secs = 600;
        settings.quantum_checkpoint_interval_secs = 1;
        settings
    }

    async fn engine_with_validators(n: usize) -> Engine<ReferenceLatticeScheme, Ed25519FastPath> {
        let engine = Engine::new(test_settings(), b"engine-test-seed".to_vec());
        for i in 0..n {
            engine.add_validator(ValidatorId(format!("v{i}")), 100).await;
        }
        engine
    }

    #[tokio::test]
    async fn primary_chains_are_registered_after_start() {
        let engine = engine_with_validators(3).await;
        engine.start().await.unwrap();
        let chains = engine.registered_chains().await;
        for name in crate::consensus::PRIMARY_CHAINS {
            assert!(chains.iter().any(|c| c.0 == name));
        }
        engine.stop().await;
    }

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let engine = engine_with_validators(2).await;
        let block = Block { id: BlockId([1u8; 32]), chain: ChainId::from("Bridge"), height: 1, timestamp: 1, payload: vec![] };
        let err = engine.submit(ChainId::from("Bridge"), block).await.unwrap_err();
        assert_eq!(err, EngineError::NotRunning);
    }

    #[tokio::test]
    async fn submit_then_verify_after_start() {
        let engine = engine_with_validators(3).await;
        engine.start().await.unwrap();

        let block = Block {
            id: BlockId([0xFFu8; 32]),
            chain: ChainId::from("Bridge"),
            height: 1,
            timestamp: 1_700_000_000,
            payload: b"bridge-tx".to_vec(),
        };
        engine.submit(ChainId::from("Bridge"), block).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let hash = crate::hash::quantum_hash("Bridge", &[0xFFu8; 32], 1, 1_700_000_000);
        assert!(engine.verify(&hash).await);
        assert!(engine.registered_chains().await.iter().any(|c| c.0 == "Bridge"));

        engine.stop().await;
    }
}
