//! Deterministic seeded sharding of a validator set into signing groups
//! (spec.md §4.2).

use sha2::{Digest, Sha256};

use crate::types::ValidatorId;

/// Seeded Fisher-Yates shuffle: at index `i` (from `len - 1` down to `1`),
/// draws `j = H(seed || be_u64(i)) mod (i + 1)` and swaps `i` and `j`. Two
/// calls with the same `(validators, seed)` always produce the same
/// permutation — this is what makes group assignment reproducible across
/// independently constructed managers (spec.md §8, "Grouping determinism").
pub fn seeded_shuffle(validators: &[ValidatorId], seed: &[u8]) -> Vec<ValidatorId> {
    let mut shuffled = validators.to_vec();
    let len = shuffled.len();
    if len < 2 {
        return shuffled;
    }
    for i in (1..len).rev() {
        let j = draw_index(seed, i as u64, i + 1);
        shuffled.swap(i, j);
    }
    shuffled
}

fn draw_index(seed: &[u8], i: u64, modulus: usize) -> usize {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(i.to_be_bytes());
    let digest = hasher.finalize();
    let mut first8 = [0u8; 8];
    first8.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(first8) % modulus as u64) as usize
}

/// Partitions a (shuffled) validator list into groups of at most
/// `group_size`; the last group may be smaller (spec.md §4.2).
pub fn partition_into_groups(validators: &[ValidatorId], group_size: usize) -> Vec<Vec<ValidatorId>> {
    validators.chunks(group_size.max(1)).map(|chunk| chunk.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validators(n: usize) -> Vec<ValidatorId> {
        (0..n).map(|i| ValidatorId(format!("v{i}"))).collect()
    }

    #[test]
    fn shuffle_is_deterministic_given_same_inputs() {
        let vs = validators(12);
        let seed = Sha256::digest(b"reproducible-seed").to_vec();
        let a = seeded_shuffle(&vs, &seed);
        let b = seeded_shuffle(&vs, &seed);
        assert_eq!(a, b);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let vs = validators(20);
        let seed = Sha256::digest(b"seed").to_vec();
        let shuffled = seeded_shuffle(&vs, &seed);
        let mut sorted_original = vs.clone();
        sorted_original.sort();
        let mut sorted_shuffled = shuffled.clone();
        sorted_shuffled.sort();
        assert_eq!(sorted_original, sorted_shuffled);
    }

    #[test]
    fn large_set_partitions_into_expected_group_count() {
        let vs = validators(99);
        let seed = Sha256::digest(b"epoch-0-seed").to_vec();
        let shuffled = seeded_shuffle(&vs, &seed);
        let groups = partition_into_groups(&shuffled, 3);
        assert_eq!(groups.len(), 33);
        assert!(groups.iter().all(|g| g.len() == 3));
    }
}
