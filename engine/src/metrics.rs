//! Lightweight counters/gauges, in the spirit of
//! `utilities::metrics::CeremonyMetrics` (referenced from the teacher's
//! `ceremony_runner.rs` but not present in the retrieval pack to adapt
//! directly). No registry, no exporter — wiring this into Prometheus or any
//! other sink is left to the embedding binary (metrics exporters are an
//! explicit spec.md Non-goal).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub blocks_finalized: AtomicU64,
    pub quantum_height: AtomicU64,
    pub proofs_emitted: AtomicU64,
    pub chains_registered: AtomicU64,
    pub epoch_rotations: AtomicU64,
    pub bundles_created: AtomicU64,
    pub bundles_signed: AtomicU64,
    pub bundles_dropped: AtomicU64,
    pub group_sign_failures: AtomicU64,
    pub current_epoch: AtomicI64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block_finalized(&self) {
        self.blocks_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_quantum_height(&self, height: u64) {
        self.quantum_height.store(height, Ordering::Relaxed);
    }

    pub fn record_proof(&self) {
        self.proofs_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_chains_registered(&self, count: u64) {
        self.chains_registered.store(count, Ordering::Relaxed);
    }

    pub fn record_epoch_rotation(&self, new_epoch: u64) {
        self.epoch_rotations.fetch_add(1, Ordering::Relaxed);
        self.current_epoch.store(new_epoch as i64, Ordering::Relaxed);
    }

    pub fn record_bundle_created(&self) {
        self.bundles_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bundle_signed(&self) {
        self.bundles_signed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bundle_dropped(&self) {
        self.bundles_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_sign_failure(&self) {
        self.group_sign_failures.fetch_add(1, Ordering::Relaxed);
    }
}
