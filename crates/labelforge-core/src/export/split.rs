//! Train/val/test partitioning.

use crate::error::{CoreError, CoreResult};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::fmt;

const RATIO_EPSILON: f64 = 1e-9;

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Self; 3] = [Self::Train, Self::Val, Self::Test];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image counts per split. Always sums to the candidate total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplitPlan {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl SplitPlan {
    /// Split of the candidate at `index` (0-based, after shuffling).
    #[must_use]
    pub fn split_of(&self, index: usize) -> Split {
        if index < self.train {
            Split::Train
        } else if index < self.train + self.val {
            Split::Val
        } else {
            Split::Test
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rounded_share(total: usize, ratio: f64) -> usize {
    if ratio <= 0.0 {
        return 0;
    }
    ((total as f64) * ratio).round() as usize
}

/// Compute split sizes.
///
/// Train and val get `round(total * ratio)` images (a non-positive ratio
/// disables the split); test takes whatever remains so nothing is lost to
/// rounding.
pub fn plan_splits(total: usize, train_ratio: f64, val_ratio: f64, test_ratio: f64) -> CoreResult<SplitPlan> {
    for (name, ratio) in [("train", train_ratio), ("val", val_ratio), ("test", test_ratio)] {
        if !ratio.is_finite() {
            return Err(CoreError::Export(format!("{name} ratio must be a finite number")));
        }
    }
    let sum = train_ratio.max(0.0) + val_ratio.max(0.0) + test_ratio.max(0.0);
    if sum > 1.0 + RATIO_EPSILON {
        return Err(CoreError::Export(format!("split ratios sum to {sum:.3}, which exceeds 1")));
    }

    let train = rounded_share(total, train_ratio).min(total);
    let val = rounded_share(total, val_ratio).min(total - train);
    let test = total - train - val;
    Ok(SplitPlan { train, val, test })
}

/// Fisher-Yates shuffle, reproducible when `seed` is set.
pub fn shuffle<T>(items: &mut [T], seed: Option<u64>) {
    match seed {
        Some(seed) => items.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => items.shuffle(&mut rand::thread_rng()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_images_eighty_twenty() {
        let plan = plan_splits(10, 0.8, 0.2, 0.0).unwrap();
        assert_eq!(plan, SplitPlan { train: 8, val: 2, test: 0 });
    }

    #[test]
    fn test_remainder_goes_to_test() {
        let plan = plan_splits(7, 0.5, 0.2, 0.3).unwrap();
        // round(3.5) = 4, round(1.4) = 1, remaining 2
        assert_eq!(plan, SplitPlan { train: 4, val: 1, test: 2 });
        assert_eq!(plan.total(), 7);
    }

    #[test]
    fn test_totals_always_match() {
        for total in 0..50 {
            for (t, v, s) in [(0.8, 0.2, 0.0), (0.7, 0.15, 0.15), (0.33, 0.33, 0.34), (1.0, 0.0, 0.0)] {
                assert_eq!(plan_splits(total, t, v, s).unwrap().total(), total);
            }
        }
    }

    #[test]
    fn test_non_positive_ratio_disables_split() {
        let plan = plan_splits(10, 0.0, -1.0, 1.0).unwrap();
        assert_eq!(plan, SplitPlan { train: 0, val: 0, test: 10 });
    }

    #[test]
    fn test_ratio_sum_above_one_rejected() {
        assert!(plan_splits(10, 0.8, 0.3, 0.0).is_err());
        assert!(plan_splits(10, f64::NAN, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_split_of_index() {
        let plan = SplitPlan { train: 2, val: 1, test: 1 };
        let splits: Vec<_> = (0..4).map(|i| plan.split_of(i)).collect();
        assert_eq!(splits, vec![Split::Train, Split::Train, Split::Val, Split::Test]);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let mut a: Vec<u32> = (0..20).collect();
        let mut b = a.clone();
        shuffle(&mut a, Some(42));
        shuffle(&mut b, Some(42));
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }
}
