//! Stable byte layouts and the Merkle tree used by the quantum bundle
//! pipeline (spec.md component A).

use sha2::{Digest, Sha256};

/// A 32-byte digest, used throughout the engine for block hashes, Merkle
/// roots, and bundle hashes.
pub type Digest32 = [u8; 32];

/// SHA-256 over the concatenation of `parts`, with no length-prefixing
/// between them (the caller is expected to use fixed-width fields, as in
/// [`bundle_hash_preimage`] and [`quantum_hash`]).
pub fn sha256_concat(parts: &[&[u8]]) -> Digest32 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Merkle root over an ordered list of fixed-size leaves (spec.md §4.4):
/// empty input yields the all-zero root, a single leaf is its own root, and
/// at each level an odd leaf out duplicates the last element before pairing.
pub fn merkle_root(leaves: &[Digest32]) -> Digest32 {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }
        level = level
            .chunks(2)
            .map(|pair| sha256_concat(&[&pair[0], &pair[1]]))
            .collect();
    }
    level[0]
}

/// The quantum hash for a single block: `"<chain>:<hex(id)>:<height>:<unixSec>"`,
/// SHA-256'd (spec.md §6).
pub fn quantum_hash(chain: &str, id: &Digest32, height: u64, unix_ts: u64) -> Digest32 {
    let preimage = format!("{}:{}:{}:{}", chain, hex::encode(id), height, unix_ts);
    sha256_concat(&[preimage.as_bytes()])
}

/// Big-endian preimage for a quantum bundle's hash (spec.md §6):
/// `u64 epoch | u64 sequence | u64 startHeight | u64 endHeight | 32-byte
/// MerkleRoot | 32-byte PreviousHash | u64 timestamp`.
#[allow(clippy::too_many_arguments)]
pub fn bundle_hash(
    epoch: u64,
    sequence: u64,
    start_height: u64,
    end_height: u64,
    merkle_root: &Digest32,
    previous_hash: &Digest32,
    timestamp: u64,
) -> Digest32 {
    sha256_concat(&[
        &epoch.to_be_bytes(),
        &sequence.to_be_bytes(),
        &start_height.to_be_bytes(),
        &end_height.to_be_bytes(),
        merkle_root,
        previous_hash,
        &timestamp.to_be_bytes(),
    ])
}

/// The ASCII signable message for a bundle signature: `"<magic>-v1:" +
/// lowercase hex of the bundle hash` (spec.md §6).
pub fn bundle_signable_message(magic: &str, hash: &Digest32) -> Vec<u8> {
    format!("{magic}-v1:{}", hex::encode(hash)).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_merkle_root_is_zero() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = [7u8; 32];
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn two_identical_leaves_hash_together() {
        let leaf = [9u8; 32];
        let expected = sha256_concat(&[&leaf, &leaf]);
        assert_eq!(merkle_root(&[leaf, leaf]), expected);
    }

    #[test]
    fn odd_leaf_count_duplicates_last() {
        let leaves = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let parent01 = sha256_concat(&[&leaves[0], &leaves[1]]);
        let parent22 = sha256_concat(&[&leaves[2], &leaves[2]]);
        let expected = sha256_concat(&[&parent01, &parent22]);
        assert_eq!(merkle_root(&leaves), expected);
    }

    #[test]
    fn flipping_a_leaf_byte_changes_the_root() {
        let mut leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32]];
        let before = merkle_root(&leaves);
        leaves[2][0] ^= 0x01;
        let after = merkle_root(&leaves);
        assert_ne!(before, after);
    }
}
