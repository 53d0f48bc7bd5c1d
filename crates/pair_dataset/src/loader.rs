//! Resolving sampled records to files and decoding image pairs into a batch.

use crate::resolver::{FolderIndex, ImagePairPaths};
use crate::sampler::{prune_per_class_by, SampledPair};
use crate::types::{ChangeLabel, DatasetError, DatasetResult, PairBatch};
use image::imageops::FilterType;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

/// What to do with a sample whose identifier, indices, or image files are bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityPolicy {
    /// Log, count, and drop the sample.
    #[default]
    Skip,
    /// Abort the run with the error.
    Fail,
}

impl IntegrityPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityPolicy::Skip => "skip",
            IntegrityPolicy::Fail => "fail",
        }
    }
}

impl fmt::Display for IntegrityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(IntegrityPolicy::Skip),
            "fail" | "fail-fast" | "fail_fast" => Ok(IntegrityPolicy::Fail),
            other => Err(format!("unknown integrity policy {other:?} (expected skip or fail)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPair {
    pub identifier: String,
    pub label: ChangeLabel,
    pub paths: ImagePairPaths,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub requested: usize,
    pub unresolved: usize,
    pub undecodable: usize,
    /// Dropped to restore class balance after skips.
    pub pruned: usize,
    pub loaded: usize,
}

impl LoadStats {
    pub fn skipped(&self) -> usize {
        self.unresolved + self.undecodable
    }
}

pub struct PairLoader<'a> {
    index: &'a FolderIndex,
    side: u32,
    policy: IntegrityPolicy,
}

impl<'a> PairLoader<'a> {
    pub fn new(index: &'a FolderIndex, side: u32, policy: IntegrityPolicy) -> Self {
        Self {
            index,
            side,
            policy,
        }
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn resolve_all(
        &self,
        samples: &[SampledPair],
        stats: &mut LoadStats,
    ) -> DatasetResult<Vec<ResolvedPair>> {
        let mut resolved = Vec::with_capacity(samples.len());
        for sample in samples {
            match self.index.resolve_str(&sample.identifier) {
                Ok(paths) => resolved.push(ResolvedPair {
                    identifier: sample.identifier.clone(),
                    label: sample.label,
                    paths,
                }),
                Err(e) => {
                    self.absorb(e, &sample.identifier)?;
                    stats.unresolved += 1;
                }
            }
        }
        Ok(resolved)
    }

    /// Resolve, decode and resize every sample, keeping at most `per_class_cap` per class.
    ///
    /// Output order follows `samples`. Skipped samples are replaced by nothing; the classes
    /// are re-pruned so both stay the same size.
    pub fn load(
        &self,
        samples: &[SampledPair],
        per_class_cap: usize,
    ) -> DatasetResult<(PairBatch, LoadStats)> {
        let mut stats = LoadStats {
            requested: samples.len(),
            ..Default::default()
        };
        let resolved = self.resolve_all(samples, &mut stats)?;
        let before = resolved.len();
        let resolved = prune_per_class_by(resolved, per_class_cap, |r| r.label);
        stats.pruned += before - resolved.len();

        let t_load = Instant::now();
        let side = self.side;
        let decoded: Vec<(ResolvedPair, DatasetResult<(Vec<f32>, Vec<f32>)>)> = resolved
            .into_par_iter()
            .map(|pair| {
                let images = load_resized(&pair.paths.first, side)
                    .and_then(|a| load_resized(&pair.paths.second, side).map(|b| (a, b)));
                (pair, images)
            })
            .collect();

        let mut ok = Vec::with_capacity(decoded.len());
        for (pair, images) in decoded {
            match images {
                Ok(images) => ok.push((pair, images)),
                Err(e) => {
                    self.absorb(e, &pair.identifier)?;
                    stats.undecodable += 1;
                }
            }
        }
        let before = ok.len();
        let ok = prune_per_class_by(ok, per_class_cap, |(pair, _)| pair.label);
        stats.pruned += before - ok.len();

        let mut batch = PairBatch::with_capacity(side, ok.len());
        for (pair, (first, second)) in ok {
            batch.push(pair.identifier, &first, &second, pair.label)?;
        }
        stats.loaded = batch.len();
        tracing::debug!(
            loaded = stats.loaded,
            skipped = stats.skipped(),
            pruned = stats.pruned,
            load_ms = t_load.elapsed().as_secs_f64() * 1000.0,
            "loaded image pairs"
        );
        Ok((batch, stats))
    }

    fn absorb(&self, err: DatasetError, identifier: &str) -> DatasetResult<()> {
        if self.policy == IntegrityPolicy::Skip && err.is_integrity() {
            tracing::warn!(identifier, error = %err, "skipping sample");
            Ok(())
        } else {
            Err(err)
        }
    }
}

/// Decode an image and resize it to `side x side` RGB, channel-first, raw 0..255 values.
pub fn load_resized(path: &Path, side: u32) -> DatasetResult<Vec<f32>> {
    let img = image::open(path).map_err(|e| DatasetError::Image {
        path: path.to_path_buf(),
        source: e,
    })?;
    let rgb = img.resize_exact(side, side, FilterType::Triangle).to_rgb8();
    let plane = side as usize * side as usize;
    let mut out = vec![0.0f32; 3 * plane];
    for (i, p) in rgb.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + i] = p[c] as f32;
        }
    }
    Ok(out)
}
