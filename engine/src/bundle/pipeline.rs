//! Component E: accumulates fast-path block hashes into Merkle-rooted
//! bundles and drives their (asynchronous) threshold signing (spec.md
//! §4.4).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_channel::{Receiver, Sender, TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use qs_threshold::{PrfKey, ThresholdScheme};

use crate::cancellation::CancellationToken;
use crate::errors::BundleError;
use crate::grouped::{GroupIndex, GroupedEpochManager};
use crate::hash::{bundle_signable_message, merkle_root, Digest32};
use crate::metrics::EngineMetrics;
use crate::types::ValidatorId;

use super::model::QuantumBundle;

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

struct PipelineState {
    pending_hashes: Vec<Digest32>,
    pending_start: Option<u64>,
    pending_end: Option<u64>,
    previous_hash: Digest32,
    sequence: u64,
    last_epoch: u64,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            pending_hashes: Vec::new(),
            pending_start: None,
            pending_end: None,
            previous_hash: [0u8; 32],
            sequence: 0,
            last_epoch: 0,
        }
    }
}

/// Buffers block hashes and turns them into signed [`QuantumBundle`]s.
/// Holds a non-owning `Arc` reference to the grouped epoch manager — the
/// pipeline never owns key material, only borrows it to drive signing
/// (spec.md §3, "Ownership").
pub struct BundlePipeline<T: ThresholdScheme> {
    state: Mutex<PipelineState>,
    grouped: Arc<GroupedEpochManager<T>>,
    magic: String,
    signing_in_progress: Arc<AtomicBool>,
    signing_handle: Mutex<Option<JoinHandle<()>>>,
    signed_tx: Sender<QuantumBundle<T>>,
    signed_rx: Receiver<QuantumBundle<T>>,
    metrics: Arc<EngineMetrics>,
}

impl<T: ThresholdScheme> BundlePipeline<T> {
    pub fn new(
        grouped: Arc<GroupedEpochManager<T>>,
        magic: impl Into<String>,
        signed_channel_capacity: usize,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let (signed_tx, signed_rx) = async_channel::bounded(signed_channel_capacity.max(1));
        Self {
            state: Mutex::new(PipelineState::default()),
            grouped,
            magic: magic.into(),
            signing_in_progress: Arc::new(AtomicBool::new(false)),
            signing_handle: Mutex::new(None),
            signed_tx,
            signed_rx,
            metrics,
        }
    }

    /// `AddBlock` (spec.md §4.4): appends a hash, tracking the first and
    /// last height observed since the last bundle.
    pub fn add_block(&self, height: u64, hash: Digest32) {
        let mut state = self.state.lock().unwrap();
        if state.pending_start.is_none() {
            state.pending_start = Some(height);
        }
        state.pending_end = Some(height);
        state.pending_hashes.push(hash);
    }

    /// `CreateBundle` (spec.md §4.4): `None` if nothing is pending;
    /// otherwise forms an unsigned bundle over everything accumulated so
    /// far, resetting sequence on epoch change.
    #[instrument(skip(self))]
    pub async fn create_bundle(&self) -> Option<QuantumBundle<T>> {
        let epoch = self.grouped.current_epoch().await;
        let mut state = self.state.lock().unwrap();
        if state.pending_hashes.is_empty() {
            return None;
        }
        if epoch != state.last_epoch {
            state.sequence = 0;
            state.last_epoch = epoch;
        }

        let root = merkle_root(&state.pending_hashes);
        let start_height = state.pending_start.expect("pending_start set alongside pending_hashes");
        let end_height = state.pending_end.expect("pending_end set alongside pending_hashes");
        let timestamp = now_unix();

        let bundle = QuantumBundle {
            epoch,
            sequence: state.sequence,
            start_height,
            end_height,
            count: state.pending_hashes.len(),
            merkle_root: root,
            block_hashes: std::mem::take(&mut state.pending_hashes),
            previous_hash: state.previous_hash,
            timestamp,
            signature: None,
        };

        state.previous_hash = bundle.hash();
        state.sequence += 1;
        state.pending_start = None;
        state.pending_end = None;

        self.metrics.record_bundle_created();
        info!(epoch, sequence = bundle.sequence - 1, count = bundle.count, "bundle created");
        Some(bundle)
    }

    /// `SignBundle` (spec.md §4.4): synchronously drives the grouped
    /// two-round protocol over the bundle's signable message and attaches
    /// the result.
    pub async fn sign_bundle(
        &self,
        mut bundle: QuantumBundle<T>,
        session_id: u64,
        prf_key: &PrfKey,
        signers_by_group: BTreeMap<GroupIndex, Vec<ValidatorId>>,
        cancellation: &CancellationToken,
    ) -> Result<QuantumBundle<T>, BundleError> {
        let hash = bundle.hash();
        let msg = bundle_signable_message(&self.magic, &hash);
        let (signature, _group_failures) =
            self.grouped.parallel_group_sign(session_id, &msg, prf_key, signers_by_group, cancellation).await?;
        bundle.signature = Some(signature);
        self.metrics.record_bundle_signed();
        Ok(bundle)
    }

    /// `SignBundleAsync` (spec.md §4.4): spawns signing in the background;
    /// on success the signed bundle is offered on the bounded channel,
    /// dropping the oldest queued bundle if it's full. The spawned task's
    /// handle is kept so [`Self::join_signing`] can wait for it to observe
    /// cancellation and exit, rather than leaving it to run past `Stop`.
    pub fn sign_bundle_async(
        self: &Arc<Self>,
        bundle: QuantumBundle<T>,
        session_id: u64,
        prf_key: PrfKey,
        signers_by_group: BTreeMap<GroupIndex, Vec<ValidatorId>>,
        cancellation: CancellationToken,
    ) {
        let pipeline = Arc::clone(self);
        pipeline.signing_in_progress.store(true, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            let result = pipeline.sign_bundle(bundle, session_id, &prf_key, signers_by_group, &cancellation).await;
            pipeline.signing_in_progress.store(false, Ordering::Relaxed);
            match result {
                Ok(signed) => pipeline.offer_signed(signed),
                Err(err) => {
                    pipeline.metrics.record_bundle_dropped();
                    warn!(%err, "bundle signing failed");
                }
            }
        });
        *self.signing_handle.lock().unwrap() = Some(handle);
    }

    /// Awaits the most recently spawned [`Self::sign_bundle_async`] task, if
    /// any is still outstanding. Used by `Stop` (spec.md §4.6) so an
    /// in-flight signing ceremony is observed to finish (or to notice
    /// cancellation) before the engine reports itself stopped.
    pub async fn join_signing(&self) {
        let handle = self.signing_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn offer_signed(&self, bundle: QuantumBundle<T>) {
        match self.signed_tx.try_send(bundle) {
            Ok(()) => {}
            Err(TrySendError::Full(bundle)) => {
                let _ = self.signed_rx.try_recv();
                if self.signed_tx.try_send(bundle).is_err() {
                    self.metrics.record_bundle_dropped();
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn is_signing_in_progress(&self) -> bool {
        self.signing_in_progress.load(Ordering::Relaxed)
    }

    /// Current grouping, for callers (the bundle runner) that need to
    /// build a full-participation `signers_by_group` map without reaching
    /// into the grouped manager directly.
    pub async fn grouped_config_snapshot(&self) -> crate::grouped::GroupedConfig<T> {
        self.grouped.current_config().await
    }

    /// A handle consumers can drain; falling behind means missed bundles,
    /// never an error (spec.md §6, "Bundle observation").
    pub fn signed_bundles(&self) -> Receiver<QuantumBundle<T>> {
        self.signed_rx.clone()
    }

    /// `VerifyBundle` (spec.md §4.4): false unless a signature is present,
    /// the recomputed Merkle root matches, and the grouped signature
    /// verifies against that epoch's still-retained group keys.
    pub async fn verify_bundle(&self, bundle: &QuantumBundle<T>) -> bool {
        let Some(signature) = &bundle.signature else {
            return false;
        };
        if merkle_root(&bundle.block_hashes) != bundle.merkle_root {
            return false;
        }
        matches!(self.grouped.verify_grouped_signature(signature).await, Ok(true))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use qs_threshold::ReferenceLatticeScheme;

    use super::*;
    use crate::hash::sha256_concat;

    fn validators(n: usize) -> Vec<ValidatorId> {
        (0..n).map(|i| ValidatorId(format!("v{i}"))).collect()
    }

    async fn pipeline_with_groups(n: usize, group_size: usize) -> Arc<BundlePipeline<ReferenceLatticeScheme>> {
        let grouped = GroupedEpochManager::<ReferenceLatticeScheme>::initialize_grouped(
            validators(n),
            b"test-seed",
            group_size,
            6,
            Duration::from_secs(600),
            Duration::from_secs(3600),
            2,
            3,
        )
        .await
        .unwrap();
        Arc::new(BundlePipeline::new(Arc::new(grouped), "quasar-bundle", 10, Arc::new(EngineMetrics::new())))
    }

    fn leaf(byte: u8) -> Digest32 {
        sha256_concat(&[&[byte; 4]])
    }

    #[tokio::test(start_paused = true)]
    async fn create_bundle_is_none_when_empty() {
        let pipeline = pipeline_with_groups(3, 5).await;
        assert!(pipeline.create_bundle().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn bundle_round_trip_sign_and_verify() {
        let pipeline = pipeline_with_groups(3, 5).await;
        for (height, b) in (100u64..106).zip(0u8..6) {
            pipeline.add_block(height, leaf(b));
        }

        let bundle = pipeline.create_bundle().await.unwrap();
        assert_eq!(bundle.start_height, 100);
        assert_eq!(bundle.end_height, 105);
        assert_eq!(bundle.sequence, 0);

        let mut signers_by_group = BTreeMap::new();
        signers_by_group.insert(GroupIndex(0), validators(3));
        let prf_key = PrfKey([5u8; 32]);
        let (_source, cancellation) = crate::cancellation::new_pair();

        let signed = pipeline.sign_bundle(bundle, 1, &prf_key, signers_by_group, &cancellation).await.unwrap();
        assert!(pipeline.verify_bundle(&signed).await);

        let mut corrupted = signed.clone();
        corrupted.block_hashes[2][0] ^= 0x01;
        assert!(!pipeline.verify_bundle(&corrupted).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_increments_within_an_epoch() {
        let pipeline = pipeline_with_groups(3, 5).await;

        pipeline.add_block(1, leaf(1));
        let first = pipeline.create_bundle().await.unwrap();
        assert_eq!(first.sequence, 0);

        pipeline.add_block(2, leaf(2));
        let second = pipeline.create_bundle().await.unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.previous_hash, first.hash());
    }
}
