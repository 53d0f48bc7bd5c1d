//! Class-balanced resampling of label records.

use crate::types::{ChangeLabel, DatasetError, DatasetResult, LabelRecord};
use rand::Rng;
use serde::Serialize;

pub const DEFAULT_PER_CLASS_CAP: usize = 50;

/// A record picked for one iteration, with its label already normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampledPair {
    pub identifier: String,
    pub label: ChangeLabel,
}

impl SampledPair {
    fn from_record(record: &LabelRecord, label: ChangeLabel) -> Self {
        Self {
            identifier: record.identifier.clone(),
            label,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancedSampler {
    pub per_class_cap: usize,
}

impl Default for BalancedSampler {
    fn default() -> Self {
        Self {
            per_class_cap: DEFAULT_PER_CLASS_CAP,
        }
    }
}

impl BalancedSampler {
    pub fn new(per_class_cap: usize) -> Self {
        Self { per_class_cap }
    }

    /// Every positive, then as many negatives drawn uniformly (with replacement) from the
    /// full record set, then at most `per_class_cap` of each class in encounter order.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        records: &[LabelRecord],
        rng: &mut R,
    ) -> DatasetResult<Vec<SampledPair>> {
        let mut selection: Vec<SampledPair> = records
            .iter()
            .filter(|r| r.label() == Some(ChangeLabel::Positive))
            .map(|r| SampledPair::from_record(r, ChangeLabel::Positive))
            .collect();
        let num_yes = selection.len();
        if num_yes == 0 {
            return Err(DatasetError::DegenerateSample(format!(
                "no positive records among {} labeled rows",
                records.len()
            )));
        }
        if !records
            .iter()
            .any(|r| r.label() == Some(ChangeLabel::Negative))
        {
            return Err(DatasetError::DegenerateSample(format!(
                "no negative records to balance {num_yes} positives against"
            )));
        }

        let mut draws = 0usize;
        while selection.len() < 2 * num_yes {
            let record = &records[rng.random_range(0..records.len())];
            draws += 1;
            if record.label() == Some(ChangeLabel::Negative) {
                selection.push(SampledPair::from_record(record, ChangeLabel::Negative));
            }
        }
        tracing::debug!(positives = num_yes, draws, "drew balanced negatives");
        Ok(prune_per_class(selection, self.per_class_cap))
    }
}

pub fn prune_per_class(samples: Vec<SampledPair>, cap: usize) -> Vec<SampledPair> {
    prune_per_class_by(samples, cap, |s| s.label)
}

/// Keep the first `min(cap, |negatives|, |positives|)` items of each class, in order.
pub fn prune_per_class_by<T, F>(items: Vec<T>, cap: usize, label_of: F) -> Vec<T>
where
    F: Fn(&T) -> ChangeLabel,
{
    let positives = items.iter().filter(|i| label_of(i).is_positive()).count();
    let negatives = items.len() - positives;
    let keep = cap.min(positives).min(negatives);
    let mut kept = [0usize; 2];
    items
        .into_iter()
        .filter(|item| {
            let slot = &mut kept[label_of(item).index()];
            *slot += 1;
            *slot <= keep
        })
        .collect()
}
