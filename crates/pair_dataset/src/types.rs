//! Core types, error definitions, and data structures for pair_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::identifier::IdentifierError;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error (line {line:?}): {source}")]
    Csv {
        line: Option<u64>,
        #[source]
        source: csv::Error,
    },
    #[error("malformed row at line {line}: expected at least {expected} fields, found {found}")]
    MalformedRow {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("invalid pair identifier {identifier:?}: {source}")]
    Identifier {
        identifier: String,
        #[source]
        source: IdentifierError,
    },
    #[error("folder index {index} out of range ({available} folders)")]
    FolderOutOfRange { index: usize, available: usize },
    #[error("image index {index} out of range in {folder} ({available} images)")]
    ImageOutOfRange {
        folder: PathBuf,
        index: usize,
        available: usize,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("degenerate sample: {0}")]
    DegenerateSample(String),
    #[error("batch of {len} samples is too small to split into train/validation/test")]
    TooSmall { len: usize },
    #[error("{0}")]
    Other(String),
}

impl DatasetError {
    /// Errors tied to a single sample rather than the whole run.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            DatasetError::Identifier { .. }
                | DatasetError::FolderOutOfRange { .. }
                | DatasetError::ImageOutOfRange { .. }
                | DatasetError::Image { .. }
        )
    }
}

/// Binary change label. `Positive` means the pair shows a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeLabel {
    Negative,
    Positive,
}

impl ChangeLabel {
    /// Interpret a raw label cell. Unknown values yield `None` and are never sampled.
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim() {
            "yes" | "1" => Some(ChangeLabel::Positive),
            "no" | "0" => Some(ChangeLabel::Negative),
            _ => None,
        }
    }

    pub fn from_bool(positive: bool) -> Self {
        if positive {
            ChangeLabel::Positive
        } else {
            ChangeLabel::Negative
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, ChangeLabel::Positive)
    }

    pub fn index(&self) -> usize {
        match self {
            ChangeLabel::Negative => 0,
            ChangeLabel::Positive => 1,
        }
    }

    pub fn as_f32(&self) -> f32 {
        self.index() as f32
    }
}

/// One row of the label CSV. The label text is kept verbatim and interpreted lazily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub identifier: String,
    pub raw_label: String,
}

impl LabelRecord {
    pub fn new(identifier: impl Into<String>, raw_label: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            raw_label: raw_label.into(),
        }
    }

    pub fn label(&self) -> Option<ChangeLabel> {
        ChangeLabel::from_raw(&self.raw_label)
    }
}

/// Decoded image pairs laid out contiguously for batching.
///
/// `pixels` holds `[len, 2, 3, side, side]` values: per sample the first image then its
/// successor, each as three channel planes of raw 0..255 intensity (before centering).
#[derive(Debug, Clone, Default)]
pub struct PairBatch {
    pub side: u32,
    pub pixels: Vec<f32>,
    pub labels: Vec<ChangeLabel>,
    pub identifiers: Vec<String>,
}

impl PairBatch {
    pub fn new(side: u32) -> Self {
        Self {
            side,
            ..Default::default()
        }
    }

    pub fn with_capacity(side: u32, samples: usize) -> Self {
        let mut batch = Self::new(side);
        batch.pixels.reserve(samples * batch.pair_len());
        batch.labels.reserve(samples);
        batch.identifiers.reserve(samples);
        batch
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Values in one channel-first image.
    pub fn image_len(&self) -> usize {
        3 * self.side as usize * self.side as usize
    }

    /// Values in one pair (two images).
    pub fn pair_len(&self) -> usize {
        2 * self.image_len()
    }

    pub fn push(
        &mut self,
        identifier: impl Into<String>,
        first: &[f32],
        second: &[f32],
        label: ChangeLabel,
    ) -> DatasetResult<()> {
        let expected = self.image_len();
        if first.len() != expected || second.len() != expected {
            return Err(DatasetError::Other(format!(
                "image buffer length mismatch: expected {expected}, got {} and {}",
                first.len(),
                second.len()
            )));
        }
        self.pixels.extend_from_slice(first);
        self.pixels.extend_from_slice(second);
        self.labels.push(label);
        self.identifiers.push(identifier.into());
        Ok(())
    }

    pub fn pair(&self, index: usize) -> &[f32] {
        let len = self.pair_len();
        &self.pixels[index * len..(index + 1) * len]
    }

    pub fn first_image(&self, index: usize) -> &[f32] {
        &self.pair(index)[..self.image_len()]
    }

    pub fn second_image(&self, index: usize) -> &[f32] {
        &self.pair(index)[self.image_len()..]
    }

    /// Copy out the samples at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> PairBatch {
        let mut out = PairBatch::with_capacity(self.side, indices.len());
        for &i in indices {
            out.pixels.extend_from_slice(self.pair(i));
            out.labels.push(self.labels[i]);
            out.identifiers.push(self.identifiers[i].clone());
        }
        out
    }

    pub fn label_values(&self) -> Vec<f32> {
        self.labels.iter().map(ChangeLabel::as_f32).collect()
    }

    /// `(negatives, positives)`.
    pub fn class_counts(&self) -> (usize, usize) {
        let positives = self.labels.iter().filter(|l| l.is_positive()).count();
        (self.labels.len() - positives, positives)
    }
}
