//! Zero-centering and train/validation/test partitioning.

use crate::types::{DatasetError, DatasetResult, PairBatch};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    /// Fraction of the whole batch held out for testing.
    pub test: f64,
    /// Fraction of the remainder held out for validation.
    pub validation: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            test: 0.3,
            validation: 0.1,
        }
    }
}

impl SplitRatios {
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [("test", self.test), ("validation", self.validation)] {
            if !(v > 0.0 && v < 1.0) {
                return Err(format!("{name} ratio must be in (0, 1), got {v}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PreparedSplits {
    pub train: PairBatch,
    pub validation: PairBatch,
    pub test: PairBatch,
    /// Per-element mean that was subtracted.
    pub mean: Vec<f32>,
}

fn held_out(ratio: f64, n: usize) -> usize {
    // Tolerance keeps e.g. 0.3 * 10 from rounding up to 4.
    (((ratio * n as f64) - 1e-9).ceil().max(0.0) as usize).min(n)
}

/// `(train, validation, test)` sizes for `n` samples.
pub fn split_counts(n: usize, ratios: &SplitRatios) -> (usize, usize, usize) {
    let test = held_out(ratios.test, n);
    let rest = n - test;
    let validation = held_out(ratios.validation, rest);
    (rest - validation, validation, test)
}

/// Uniformly random, exhaustive and disjoint partition of `0..n`.
pub fn split_indices<R: Rng + ?Sized>(
    n: usize,
    ratios: &SplitRatios,
    rng: &mut R,
) -> DatasetResult<SplitIndices> {
    let (n_train, n_val, n_test) = split_counts(n, ratios);
    if n_train == 0 || n_val == 0 || n_test == 0 {
        return Err(DatasetError::TooSmall { len: n });
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let (test, rest) = order.split_at(n_test);
    let (validation, train) = rest.split_at(n_val);
    Ok(SplitIndices {
        train: train.to_vec(),
        validation: validation.to_vec(),
        test: test.to_vec(),
    })
}

/// Subtract the batch's own per-element mean from every sample. Returns the mean.
pub fn zero_center(batch: &mut PairBatch) -> Vec<f32> {
    let len = batch.pair_len();
    let n = batch.len();
    if n == 0 || len == 0 {
        return vec![0.0; len];
    }
    let mut sums = vec![0.0f64; len];
    for sample in batch.pixels.chunks_exact(len) {
        for (acc, v) in sums.iter_mut().zip(sample) {
            *acc += *v as f64;
        }
    }
    let mean: Vec<f32> = sums.into_iter().map(|s| (s / n as f64) as f32).collect();
    for sample in batch.pixels.chunks_exact_mut(len) {
        for (v, m) in sample.iter_mut().zip(&mean) {
            *v -= *m;
        }
    }
    mean
}

pub fn prepare<R: Rng + ?Sized>(
    mut batch: PairBatch,
    ratios: &SplitRatios,
    rng: &mut R,
) -> DatasetResult<PreparedSplits> {
    let mean = zero_center(&mut batch);
    let split = split_indices(batch.len(), ratios, rng)?;
    Ok(PreparedSplits {
        train: batch.select(&split.train),
        validation: batch.select(&split.validation),
        test: batch.select(&split.test),
        mean,
    })
}
