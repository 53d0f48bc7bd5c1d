//! Run configuration: built-in defaults, an optional TOML file, then CLI flags.

use std::path::{Path, PathBuf};

use models::SiameseClassifierConfig;
use pair_dataset::{default_extensions, IntegrityPolicy, LabelStoreConfig, SplitRatios};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eval_loop::LoopSettings;
use crate::trainer::{check_weights, weights_file, OptimizerSettings};
use crate::util::TrainArgs;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("labels file not found: {0}")]
    MissingLabels(PathBuf),
    #[error("image root is not a directory: {0}")]
    MissingImageRoot(PathBuf),
    #[error("weights file not found: {0}")]
    MissingWeights(PathBuf),
    #[error("weights {path} do not fit the classifier: {reason}")]
    IncompatibleWeights { path: PathBuf, reason: String },
    #[error("no weights given; pass --weights-in, or --from-scratch to start from random weights")]
    NoWeights,
    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainConfig {
    pub labels_csv: PathBuf,
    pub image_root: PathBuf,
    pub label_column: usize,
    pub extensions: Vec<String>,
    pub side: u32,
    pub per_class_cap: usize,
    pub iterations: usize,
    pub threshold: f32,
    pub ratios: SplitRatios,
    pub optimizer: OptimizerSettings,
    pub policy: IntegrityPolicy,
    pub seed: Option<u64>,
    pub weights_in: Option<PathBuf>,
    /// Allow a run without `weights_in`, starting from random initialisation.
    pub from_scratch: bool,
    pub weights_out: Option<PathBuf>,
    pub report_json: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let loop_defaults = LoopSettings::default();
        Self {
            labels_csv: PathBuf::from("data/train.csv"),
            image_root: PathBuf::from("data/locations"),
            label_column: LabelStoreConfig::default().label_column,
            extensions: default_extensions(),
            side: loop_defaults.side,
            per_class_cap: loop_defaults.per_class_cap,
            iterations: loop_defaults.iterations,
            threshold: loop_defaults.threshold,
            ratios: loop_defaults.ratios,
            optimizer: OptimizerSettings::default(),
            policy: loop_defaults.policy,
            seed: None,
            weights_in: None,
            from_scratch: false,
            weights_out: None,
            report_json: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainConfigFile {
    labels_csv: Option<String>,
    image_root: Option<String>,
    label_column: Option<usize>,
    extensions: Option<Vec<String>>,
    side: Option<u32>,
    per_class_cap: Option<usize>,
    iterations: Option<usize>,
    threshold: Option<f32>,
    seed: Option<u64>,
    on_integrity_error: Option<IntegrityPolicy>,
    weights_in: Option<String>,
    from_scratch: Option<bool>,
    weights_out: Option<String>,
    report_json: Option<String>,
    split: Option<SplitSection>,
    optimizer: Option<OptimizerSettings>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SplitSection {
    test: Option<f64>,
    validation: Option<f64>,
}

impl TrainConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&raw).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        let file: TrainConfigFile = toml::from_str(raw).map_err(|e| e.to_string())?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: TrainConfigFile) -> Self {
        let d = TrainConfig::default();
        let split = file.split.unwrap_or_default();
        TrainConfig {
            labels_csv: file.labels_csv.map(PathBuf::from).unwrap_or(d.labels_csv),
            image_root: file.image_root.map(PathBuf::from).unwrap_or(d.image_root),
            label_column: file.label_column.unwrap_or(d.label_column),
            extensions: file.extensions.unwrap_or(d.extensions),
            side: file.side.unwrap_or(d.side),
            per_class_cap: file.per_class_cap.unwrap_or(d.per_class_cap),
            iterations: file.iterations.unwrap_or(d.iterations),
            threshold: file.threshold.unwrap_or(d.threshold),
            ratios: SplitRatios {
                test: split.test.unwrap_or(d.ratios.test),
                validation: split.validation.unwrap_or(d.ratios.validation),
            },
            optimizer: file.optimizer.unwrap_or(d.optimizer),
            policy: file.on_integrity_error.unwrap_or(d.policy),
            seed: file.seed.or(d.seed),
            weights_in: file.weights_in.map(PathBuf::from),
            from_scratch: file.from_scratch.unwrap_or(d.from_scratch),
            weights_out: file.weights_out.map(PathBuf::from),
            report_json: file.report_json.map(PathBuf::from),
        }
    }

    /// Layer CLI flags over the config file named by `--config` (or the env var), or defaults.
    pub fn resolve(args: &TrainArgs) -> Result<Self, ConfigError> {
        let mut cfg = match &args.config {
            Some(path) => Self::from_path(path)?,
            None => TrainConfig::default(),
        };
        cfg.apply_args(args);
        Ok(cfg)
    }

    pub fn apply_args(&mut self, args: &TrainArgs) {
        if let Some(v) = &args.labels {
            self.labels_csv = v.clone();
        }
        if let Some(v) = &args.image_root {
            self.image_root = v.clone();
        }
        if let Some(v) = args.label_column {
            self.label_column = v;
        }
        if !args.extensions.is_empty() {
            self.extensions = args.extensions.clone();
        }
        if let Some(v) = args.side {
            self.side = v;
        }
        if let Some(v) = args.per_class_cap {
            self.per_class_cap = v;
        }
        if let Some(v) = args.iterations {
            self.iterations = v;
        }
        if let Some(v) = args.threshold {
            self.threshold = v;
        }
        if let Some(v) = args.test_ratio {
            self.ratios.test = v;
        }
        if let Some(v) = args.validation_ratio {
            self.ratios.validation = v;
        }
        if let Some(v) = args.epochs {
            self.optimizer.epochs = v;
        }
        if let Some(v) = args.batch_size {
            self.optimizer.batch_size = v;
        }
        if let Some(v) = args.lr {
            self.optimizer.learning_rate = v;
        }
        if let Some(v) = args.decay {
            self.optimizer.decay = v;
        }
        if let Some(v) = args.momentum {
            self.optimizer.momentum = v;
        }
        if let Some(v) = args.nesterov {
            self.optimizer.nesterov = v;
        }
        if let Some(v) = args.on_integrity_error {
            self.policy = v;
        }
        if args.seed.is_some() {
            self.seed = args.seed;
        }
        if args.weights_in.is_some() {
            self.weights_in = args.weights_in.clone();
        }
        if args.from_scratch {
            self.from_scratch = true;
            self.weights_in = None;
        }
        if args.weights_out.is_some() {
            self.weights_out = args.weights_out.clone();
        }
        if args.report_json.is_some() {
            self.report_json = args.report_json.clone();
        }
    }

    /// Checked once before the first iteration.
    pub fn validate(&self, model: &SiameseClassifierConfig) -> Result<(), ConfigError> {
        if !self.labels_csv.is_file() {
            return Err(ConfigError::MissingLabels(self.labels_csv.clone()));
        }
        if !self.image_root.is_dir() {
            return Err(ConfigError::MissingImageRoot(self.image_root.clone()));
        }
        match &self.weights_in {
            Some(path) => {
                check_weights(path, model)?;
            }
            None if !self.from_scratch => return Err(ConfigError::NoWeights),
            None => {}
        }
        if let Some(path) = &self.weights_out {
            weights_file(path)?;
        }
        if self.iterations == 0 {
            return Err(ConfigError::Invalid("iterations must be at least 1".into()));
        }
        if self.per_class_cap == 0 {
            return Err(ConfigError::Invalid("per_class_cap must be at least 1".into()));
        }
        if self.extensions.is_empty() {
            return Err(ConfigError::Invalid("no image extensions configured".into()));
        }
        if self.side < model.min_side() {
            return Err(ConfigError::Invalid(format!(
                "side {} is below the classifier minimum of {}",
                self.side,
                model.min_side()
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        self.ratios.validate().map_err(ConfigError::Invalid)?;
        let opt = &self.optimizer;
        if opt.batch_size == 0 || opt.epochs == 0 {
            return Err(ConfigError::Invalid(
                "batch_size and epochs must be at least 1".into(),
            ));
        }
        if opt.learning_rate <= 0.0 || opt.decay < 0.0 || !(0.0..1.0).contains(&opt.momentum) {
            return Err(ConfigError::Invalid(format!(
                "bad optimizer settings: lr {}, decay {}, momentum {}",
                opt.learning_rate, opt.decay, opt.momentum
            )));
        }
        Ok(())
    }

    pub fn label_store(&self) -> LabelStoreConfig {
        LabelStoreConfig {
            label_column: self.label_column,
            ..LabelStoreConfig::default()
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            iterations: self.iterations,
            per_class_cap: self.per_class_cap,
            side: self.side,
            threshold: self.threshold,
            ratios: self.ratios,
            policy: self.policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = TrainConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, TrainConfig::default());
        assert_eq!(cfg.optimizer.batch_size, 9);
        assert_eq!(cfg.side, 224);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = TrainConfig::from_toml_str(
            r#"
            labels_csv = "votes.csv"
            iterations = 3
            on_integrity_error = "fail"

            [split]
            test = 0.25

            [optimizer]
            learning_rate = 0.01
            nesterov = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.labels_csv, PathBuf::from("votes.csv"));
        assert_eq!(cfg.iterations, 3);
        assert_eq!(cfg.policy, IntegrityPolicy::Fail);
        assert_eq!(cfg.ratios.test, 0.25);
        assert_eq!(cfg.ratios.validation, 0.1);
        assert_eq!(cfg.optimizer.learning_rate, 0.01);
        assert!(!cfg.optimizer.nesterov);
        assert_eq!(cfg.optimizer.momentum, 0.5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(TrainConfig::from_toml_str("iteratons = 3").is_err());
    }

    #[test]
    fn from_scratch_is_read_from_file() {
        assert!(TrainConfig::from_toml_str("from_scratch = true").unwrap().from_scratch);
        assert!(!TrainConfig::default().from_scratch);
    }

    #[test]
    fn validation_reports_missing_paths() {
        let model = SiameseClassifierConfig::default();
        let cfg = TrainConfig {
            labels_csv: PathBuf::from("/definitely/missing.csv"),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(&model),
            Err(ConfigError::MissingLabels(_))
        ));
    }
}
