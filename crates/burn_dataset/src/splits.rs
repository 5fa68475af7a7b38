//! Seeded train/test splitting.

use crate::types::SampleIndex;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffle with a seeded permutation and hold out the last `holdout` samples for test.
///
/// `holdout` is clamped to `len - 1` so the training split is never empty
/// (unless the dataset itself is).
pub fn split_train_test(
    mut indices: Vec<SampleIndex>,
    holdout: usize,
    seed: u64,
) -> (Vec<SampleIndex>, Vec<SampleIndex>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let holdout = holdout.min(indices.len().saturating_sub(1));
    let test = indices.split_off(indices.len() - holdout);
    (indices, test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn indices(n: usize) -> Vec<SampleIndex> {
        (0..n)
            .map(|i| SampleIndex {
                image_id: i as u64,
                image_path: PathBuf::from(format!("img_{i}.png")),
                mask_path: PathBuf::from(format!("mask_{i}.png")),
            })
            .collect()
    }

    #[test]
    fn holds_out_requested_count() {
        let (train, test) = split_train_test(indices(20), 5, 7);
        assert_eq!(train.len(), 15);
        assert_eq!(test.len(), 5);
        let mut ids: Vec<u64> = train.iter().chain(test.iter()).map(|s| s.image_id).collect();
        ids.sort();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn same_seed_same_split() {
        let a = split_train_test(indices(30), 10, 99);
        let b = split_train_test(indices(30), 10, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn small_dataset_keeps_one_training_sample() {
        let (train, test) = split_train_test(indices(3), 50, 1);
        assert_eq!(train.len(), 1);
        assert_eq!(test.len(), 2);
        let (train, test) = split_train_test(Vec::new(), 50, 1);
        assert!(train.is_empty() && test.is_empty());
    }
}
