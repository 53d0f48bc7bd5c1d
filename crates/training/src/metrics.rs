//! Binary classification quality: confusion matrices and Cohen's kappa.

use pair_dataset::ChangeLabel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Probabilities strictly above `threshold` count as a change.
pub fn binarize(probabilities: &[f32], threshold: f32) -> Vec<ChangeLabel> {
    probabilities
        .iter()
        .map(|p| ChangeLabel::from_bool(*p > threshold))
        .collect()
}

/// 2x2 counts; rows are the true label, columns the predicted one: `[[tn, fp], [fn, tp]]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: [[u64; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_labels(truth: &[ChangeLabel], predicted: &[ChangeLabel]) -> Self {
        debug_assert_eq!(truth.len(), predicted.len());
        let mut m = ConfusionMatrix::default();
        for (t, p) in truth.iter().zip(predicted) {
            m.counts[t.index()][p.index()] += 1;
        }
        m
    }

    pub fn true_negatives(&self) -> u64 {
        self.counts[0][0]
    }

    pub fn false_positives(&self) -> u64 {
        self.counts[0][1]
    }

    pub fn false_negatives(&self) -> u64 {
        self.counts[1][0]
    }

    pub fn true_positives(&self) -> u64 {
        self.counts[1][1]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.true_negatives() + self.true_positives()) as f64 / total as f64
    }

    /// Cohen's kappa of the two raters summarized by this matrix.
    ///
    /// When chance agreement is total (both raters used one identical class) the statistic
    /// is undefined; that case scores 1.0 for perfect agreement and 0.0 otherwise.
    pub fn kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let observed = (self.true_negatives() + self.true_positives()) as f64 / total;
        let mut expected = 0.0;
        for class in 0..2 {
            let row: u64 = self.counts[class].iter().sum();
            let col: u64 = self.counts.iter().map(|r| r[class]).sum();
            expected += (row as f64 / total) * (col as f64 / total);
        }
        if (1.0 - expected).abs() < f64::EPSILON {
            return if (observed - 1.0).abs() < f64::EPSILON {
                1.0
            } else {
                0.0
            };
        }
        (observed - expected) / (1.0 - expected)
    }
}

impl Add for ConfusionMatrix {
    type Output = ConfusionMatrix;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for ConfusionMatrix {
    fn add_assign(&mut self, rhs: Self) {
        for (row, other) in self.counts.iter_mut().zip(rhs.counts) {
            for (a, b) in row.iter_mut().zip(other) {
                *a += b;
            }
        }
    }
}

impl std::iter::Sum for ConfusionMatrix {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ConfusionMatrix::default(), Add::add)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        let [[tn, fp], [fn_, tp]] = self.counts;
        writeln!(f, "[[{tn:>width$} {fp:>width$}]")?;
        write!(f, " [{fn_:>width$} {tp:>width$}]]")
    }
}

pub fn cohen_kappa(truth: &[ChangeLabel], predicted: &[ChangeLabel]) -> f64 {
    ConfusionMatrix::from_labels(truth, predicted).kappa()
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
