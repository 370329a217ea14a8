use qs_threshold::ThresholdScheme;

use crate::grouped::GroupedSignature;
use crate::hash::{bundle_hash, Digest32};

/// A quantum-safe anchor over a contiguous range of fast-path blocks
/// (spec.md §3, "QuantumBundle"). Invariant: `merkle_root ==
/// merkle_root(block_hashes)`; `sequence` resets to 0 on epoch change.
#[derive(Clone)]
pub struct QuantumBundle<T: ThresholdScheme> {
    pub epoch: u64,
    pub sequence: u64,
    pub start_height: u64,
    pub end_height: u64,
    pub count: usize,
    pub merkle_root: Digest32,
    pub block_hashes: Vec<Digest32>,
    pub previous_hash: Digest32,
    pub timestamp: u64,
    pub signature: Option<GroupedSignature<T>>,
}

impl<T: ThresholdScheme> std::fmt::Debug for QuantumBundle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantumBundle")
            .field("epoch", &self.epoch)
            .field("sequence", &self.sequence)
            .field("start_height", &self.start_height)
            .field("end_height", &self.end_height)
            .field("count", &self.count)
            .field("signed", &self.signature.is_some())
            .finish()
    }
}

impl<T: ThresholdScheme> QuantumBundle<T> {
    /// The bit-exact bundle hash (spec.md §6): big-endian `epoch | sequence
    /// | startHeight | endHeight | MerkleRoot | PreviousHash | timestamp`.
    pub fn hash(&self) -> Digest32 {
        bundle_hash(
            self.epoch,
            self.sequence,
            self.start_height,
            self.end_height,
            &self.merkle_root,
            &self.previous_hash,
            self.timestamp,
        )
    }
}
