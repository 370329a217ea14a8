use std::collections::BTreeMap;

use crate::fastpath::FastPathScheme;
use crate::hash::Digest32;
use crate::types::{BlockId, ChainId, ValidatorId};

/// A single chain's input unit (spec.md §3, "Block"). Read-only once
/// ingested.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub chain: ChainId,
    pub height: u64,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

/// Two independent signature layers over the same signed bytes (spec.md
/// §3, "HybridSignature"). `lattice` is reserved for the quantum-anchor
/// path; at the per-block layer it is populated only when a caller
/// explicitly anchors a single block (the common case defers quantum
/// anchoring to the bundle pipeline, component E, and leaves this `None`).
#[derive(Clone)]
pub struct HybridSignature<F: FastPathScheme> {
    pub classical: F::Signature,
    pub lattice: Option<Vec<u8>>,
}

impl<F: FastPathScheme> std::fmt::Debug for HybridSignature<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSignature")
            .field("classical", &self.classical)
            .field("lattice_present", &self.lattice.is_some())
            .finish()
    }
}

/// A block (or set of blocks, usually one) finalized by the fast path
/// (spec.md §3, "FinalizedBlock").
#[derive(Clone)]
pub struct FinalizedBlock<F: FastPathScheme> {
    pub height: u64,
    pub source_blocks: Vec<Block>,
    pub quantum_hash: Digest32,
    pub timestamp: u64,
    pub signatures: BTreeMap<ValidatorId, HybridSignature<F>>,
}

impl<F: FastPathScheme> std::fmt::Debug for FinalizedBlock<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizedBlock")
            .field("height", &self.height)
            .field("quantum_hash", &hex::encode(self.quantum_hash))
            .field("signers", &self.signatures.len())
            .finish()
    }
}

/// Snapshot returned by `Stats` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusStats {
    pub quantum_height: u64,
    pub processed: u64,
    pub proofs: u64,
    pub chains: usize,
}
