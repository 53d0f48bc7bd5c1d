//! Loading labeled pair identifiers from the vote CSV.

use crate::types::{ChangeLabel, DatasetError, DatasetResult, LabelRecord};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// First-column value that marks the header row.
pub const HEADER_SENTINEL: &str = "id";
/// Label value for rows nobody has voted on yet.
pub const UNLABELED: &str = "null";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelStoreConfig {
    /// Column holding the pair identifier.
    pub identifier_column: usize,
    /// Column holding the yes/no vote.
    pub label_column: usize,
}

impl Default for LabelStoreConfig {
    fn default() -> Self {
        Self {
            identifier_column: 0,
            label_column: 5,
        }
    }
}

/// Class counts over a loaded record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelSummary {
    pub total: usize,
    pub positives: usize,
    pub negatives: usize,
    pub unrecognized: usize,
}

impl LabelSummary {
    pub fn from_records(records: &[LabelRecord]) -> Self {
        let mut summary = LabelSummary {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            match record.label() {
                Some(ChangeLabel::Positive) => summary.positives += 1,
                Some(ChangeLabel::Negative) => summary.negatives += 1,
                None => summary.unrecognized += 1,
            }
        }
        summary
    }
}

pub fn load_labels(path: &Path, cfg: &LabelStoreConfig) -> DatasetResult<Vec<LabelRecord>> {
    let file = File::open(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let records = parse_labels(file, cfg)?;
    let summary = LabelSummary::from_records(&records);
    tracing::info!(
        path = %path.display(),
        total = summary.total,
        positives = summary.positives,
        negatives = summary.negatives,
        unrecognized = summary.unrecognized,
        "loaded label records"
    );
    Ok(records)
}

/// Parse label rows, dropping the header and unlabeled rows.
///
/// Rows too short to contain the label column are rejected rather than skipped.
pub fn parse_labels<R: Read>(source: R, cfg: &LabelStoreConfig) -> DatasetResult<Vec<LabelRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(source);
    let needed = cfg.identifier_column.max(cfg.label_column) + 1;
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| DatasetError::Csv {
            line: e.position().map(|p| p.line()),
            source: e,
        })?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        if row.len() < needed {
            // A blank line carries no data; anything else short is malformed.
            if row.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            return Err(DatasetError::MalformedRow {
                line,
                expected: needed,
                found: row.len(),
            });
        }
        let identifier = &row[cfg.identifier_column];
        let raw_label = &row[cfg.label_column];
        if identifier == HEADER_SENTINEL || raw_label == UNLABELED {
            continue;
        }
        records.push(LabelRecord::new(identifier, raw_label));
    }
    Ok(records)
}
