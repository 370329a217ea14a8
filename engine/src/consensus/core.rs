//! Component F: multi-chain block ingest and fast-path finalization
//! (spec.md §4.5).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::cancellation::CancellationToken;
use crate::errors::EngineError;
use crate::fastpath::{FastPathKeyring, FastPathScheme};
use crate::hash::{quantum_hash, sha256_concat, Digest32};
use crate::metrics::EngineMetrics;
use crate::types::{ChainId, ValidatorId};

use super::model::{Block, ConsensusStats, FinalizedBlock, HybridSignature};

/// Pre-registered on construction (spec.md §8, scenario 1).
pub const PRIMARY_CHAINS: [&str; 3] = ["P-Chain", "X-Chain", "C-Chain"];

struct ChainBuffer {
    sender: Sender<Block>,
}

/// Owns per-chain ingest buffers and the finalized-blocks map exclusively
/// (spec.md §3, "Ownership"). One worker task per registered chain
/// processes its buffer in FIFO order; across chains there is no ordering
/// guarantee.
pub struct ConsensusCore<F: FastPathScheme> {
    buffers: RwLock<BTreeMap<ChainId, ChainBuffer>>,
    finalized: RwLock<BTreeMap<Digest32, FinalizedBlock<F>>>,
    recent_since_tick: RwLock<Vec<Digest32>>,
    quantum_height: AtomicU64,
    processed: AtomicU64,
    proofs: AtomicU64,
    running: AtomicBool,
    buffer_capacity: usize,
    fastpath: Arc<FastPathKeyring<F>>,
    metrics: Arc<EngineMetrics>,
    cancellation: CancellationToken,
    /// Emits `(height, quantum_hash)` for every block finalized, feeding
    /// the bundle pipeline (component E) without coupling this component
    /// to the threshold scheme type it signs with.
    finalized_tx: Sender<(u64, Digest32)>,
}

impl<F: FastPathScheme> ConsensusCore<F> {
    pub fn new(
        fastpath: Arc<FastPathKeyring<F>>,
        buffer_capacity: usize,
        metrics: Arc<EngineMetrics>,
        cancellation: CancellationToken,
        finalized_tx: Sender<(u64, Digest32)>,
    ) -> Arc<Self> {
        let mut initial = BTreeMap::new();
        let mut workers = Vec::new();
        for chain in PRIMARY_CHAINS {
            let chain = ChainId::from(chain);
            let (sender, receiver) = async_channel::bounded(buffer_capacity.max(1));
            initial.insert(chain.clone(), ChainBuffer { sender });
            workers.push((chain, receiver));
        }

        let core = Arc::new(Self {
            buffers: RwLock::new(initial),
            finalized: RwLock::new(BTreeMap::new()),
            recent_since_tick: RwLock::new(Vec::new()),
            quantum_height: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            proofs: AtomicU64::new(0),
            running: AtomicBool::new(false),
            buffer_capacity,
            fastpath,
            metrics,
            cancellation,
            finalized_tx,
        });
        core.metrics.set_chains_registered(workers.len() as u64);

        for (chain, receiver) in workers {
            tokio::spawn(core.clone().run_chain_worker(chain, receiver));
        }

        core
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("consensus core started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn registered_chains(&self) -> Vec<ChainId> {
        self.buffers.read().await.keys().cloned().collect()
    }

    /// Lazily registers a chain and spawns its worker; idempotent even
    /// under concurrent callers racing on the same new chain name.
    async fn ensure_registered(self: &Arc<Self>, chain: &ChainId) {
        if self.buffers.read().await.contains_key(chain) {
            return;
        }

        let (sender, receiver) = async_channel::bounded(self.buffer_capacity.max(1));
        let newly_inserted = {
            let mut buffers = self.buffers.write().await;
            if buffers.contains_key(chain) {
                false
            } else {
                buffers.insert(chain.clone(), ChainBuffer { sender });
                true
            }
        };
        if !newly_inserted {
            return;
        }

        self.metrics.set_chains_registered(self.buffers.read().await.len() as u64);
        tokio::spawn(self.clone().run_chain_worker(chain.clone(), receiver));
        info!(%chain, "chain auto-registered");
    }

    #[instrument(skip(self, receiver), fields(chain = %chain))]
    async fn run_chain_worker(self: Arc<Self>, chain: ChainId, receiver: Receiver<Block>) {
        let mut cancellation = self.cancellation.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    info!(%chain, "worker stopping");
                    break;
                }
                block = receiver.recv() => {
                    match block {
                        Ok(block) => self.finalize(block).await,
                        Err(_) => break,
                    }
                }
            }
        }
    }

    async fn finalize(&self, block: Block) {
        let quantum_hash = quantum_hash(&block.chain.0, &block.id.0, block.height, block.timestamp);

        let mut signatures = BTreeMap::new();
        for validator in self.fastpath.validators() {
            if let Some(sig) = self.fastpath.sign_for(validator, &quantum_hash) {
                signatures.insert(validator.clone(), HybridSignature { classical: sig, lattice: None });
            }
        }

        let height = self.quantum_height.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.set_quantum_height(height);
        self.processed.fetch_add(1, Ordering::Relaxed);

        let finalized_block = FinalizedBlock {
            height,
            source_blocks: vec![block],
            quantum_hash,
            timestamp: timestamp_unchecked(),
            signatures,
        };
        self.finalized.write().await.insert(quantum_hash, finalized_block);
        self.recent_since_tick.write().await.push(quantum_hash);
        self.metrics.record_block_finalized();
        let _ = self.finalized_tx.try_send((height, quantum_hash));
    }

    /// `Submit` (spec.md §6): routes to the chain's buffer, registering it
    /// lazily on first use. A saturated buffer drops its oldest entry
    /// (receive then send) rather than erroring, per spec.md §7's default
    /// policy.
    pub async fn submit(self: &Arc<Self>, chain: ChainId, block: Block) -> Result<(), EngineError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }
        self.ensure_registered(&chain).await;

        let buffers = self.buffers.read().await;
        let buffer = buffers.get(&chain).ok_or_else(|| EngineError::UnknownChain(chain.0.clone()))?;
        match buffer.sender.try_send(block) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(block)) => {
                warn!(%chain, "buffer full, dropping oldest");
                // The worker may win the race and drain the slot we're
                // about to make; a second try_send failing after that is
                // harmless; we don't re-retry to keep this lock-free.
                let _ = buffer.sender.try_recv();
                let _ = buffer.sender.try_send(block);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(EngineError::UnknownChain(chain.0.clone())),
        }
    }

    /// `Verify` (spec.md §4.5, §6): every recorded signature for `hash`
    /// must re-verify against the quantum hash bytes and the validator's
    /// fast-path key.
    pub async fn verify(&self, hash: &Digest32) -> bool {
        let finalized = self.finalized.read().await;
        let Some(record) = finalized.get(hash) else {
            return false;
        };
        record.signatures.iter().all(|(validator, sig)| self.fastpath.verify_for(validator, hash, &sig.classical))
    }

    /// Quantum-epoch finalizer tick (spec.md §4.5): digests everything
    /// finalized since the last tick and bumps the proof counter, if
    /// anything happened.
    pub async fn finalizer_tick(&self) {
        let mut recent = self.recent_since_tick.write().await;
        if recent.is_empty() {
            return;
        }
        let refs: Vec<&[u8]> = recent.iter().map(|h| h.as_slice()).collect();
        let _proof_digest = sha256_concat(&refs);
        self.proofs.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_proof();
        recent.clear();
    }

    pub async fn stats(&self) -> ConsensusStats {
        ConsensusStats {
            quantum_height: self.quantum_height.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::Relaxed),
            proofs: self.proofs.load(Ordering::Relaxed),
            chains: self.buffers.read().await.len(),
        }
    }
}

fn timestamp_unchecked() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::cancellation::new_pair;
    use crate::fastpath::Ed25519FastPath;
    use crate::types::BlockId;

    use super::*;

    fn sample_block(chain: &str, height: u64) -> Block {
        Block {
            id: BlockId([height as u8; 32]),
            chain: ChainId::from(chain),
            height,
            timestamp: 1_700_000_000,
            payload: b"payload".to_vec(),
        }
    }

    fn core_with_validators(n: usize, buffer_capacity: usize) -> Arc<ConsensusCore<Ed25519FastPath>> {
        let mut rng = StdRng::seed_from_u64(42);
        let validators: Vec<ValidatorId> = (0..n).map(|i| ValidatorId(format!("v{i}"))).collect();
        let keyring = Arc::new(FastPathKeyring::<Ed25519FastPath>::generate(&validators, &mut rng));
        let (_source, token) = new_pair();
        let (finalized_tx, _finalized_rx) = async_channel::unbounded();
        ConsensusCore::new(keyring, buffer_capacity, Arc::new(EngineMetrics::new()), token, finalized_tx)
    }

    #[tokio::test]
    async fn primary_chains_are_pre_registered() {
        let core = core_with_validators(1, 10);
        let chains = core.registered_chains().await;
        for name in PRIMARY_CHAINS {
            assert!(chains.iter().any(|c| c.0 == name));
        }
    }

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let core = core_with_validators(1, 10);
        let err = core.submit(ChainId::from("P-Chain"), sample_block("P-Chain", 1)).await.unwrap_err();
        assert_eq!(err, EngineError::NotRunning);
    }

    #[tokio::test]
    async fn submit_then_verify_round_trips() {
        let core = core_with_validators(2, 10);
        core.start();
        core.submit(ChainId::from("P-Chain"), sample_block("P-Chain", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let hash = quantum_hash("P-Chain", &[1u8; 32], 1, 1_700_000_000);
        assert!(core.verify(&hash).await);
        assert!(!core.verify(&[0xFFu8; 32]).await);
    }

    #[tokio::test]
    async fn unregistered_chains_auto_register_on_submit() {
        let core = core_with_validators(1, 10);
        core.start();
        core.submit(ChainId::from("Bridge"), sample_block("Bridge", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let chains = core.registered_chains().await;
        assert!(chains.iter().any(|c| c.0 == "Bridge"));
    }

    #[tokio::test]
    async fn finalizer_tick_bumps_proofs_only_when_blocks_arrived() {
        let core = core_with_validators(1, 10);
        core.start();

        core.finalizer_tick().await;
        assert_eq!(core.stats().await.proofs, 0);

        core.submit(ChainId::from("P-Chain"), sample_block("P-Chain", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        core.finalizer_tick().await;
        assert_eq!(core.stats().await.proofs, 1);
    }
}
