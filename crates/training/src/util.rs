use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use models::SiameseClassifierConfig;
use pair_dataset::{load_labels, FolderIndex, IntegrityPolicy};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::TrainConfig;
use crate::eval_loop::{EvaluationLoop, RunReport};
use crate::trainer::{PairClassifier, SiameseTrainer};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train the siamese change classifier over resampled, balanced iterations"
)]
pub struct TrainArgs {
    /// TOML file supplying defaults for every flag below.
    #[arg(long, env = "CHANGE_TRAIN_CONFIG")]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// CSV of labeled pair identifiers.
    #[arg(long)]
    pub labels: Option<PathBuf>,
    /// Directory holding one subfolder of sequential images per location.
    #[arg(long)]
    pub image_root: Option<PathBuf>,
    /// Zero-based column holding the label.
    #[arg(long)]
    pub label_column: Option<usize>,
    /// Image file extension to index (repeatable).
    #[arg(long = "extension")]
    pub extensions: Vec<String>,
    /// Side in pixels images are resized to.
    #[arg(long)]
    pub side: Option<u32>,
    /// Maximum samples kept per class in one iteration.
    #[arg(long)]
    pub per_class_cap: Option<usize>,
    /// Number of resampling iterations.
    #[arg(long)]
    pub iterations: Option<usize>,
    /// Probabilities above this count as a change.
    #[arg(long)]
    pub threshold: Option<f32>,
    #[arg(long)]
    pub test_ratio: Option<f64>,
    #[arg(long)]
    pub validation_ratio: Option<f64>,
    /// Epochs per iteration.
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Time-based learning-rate decay per optimizer step.
    #[arg(long)]
    pub decay: Option<f64>,
    #[arg(long)]
    pub momentum: Option<f64>,
    #[arg(long)]
    pub nesterov: Option<bool>,
    /// Seed for sampling, splitting and shuffling (entropy when absent).
    #[arg(long)]
    pub seed: Option<u64>,
    /// What to do with unresolvable or undecodable samples: skip or fail.
    #[arg(long)]
    pub on_integrity_error: Option<IntegrityPolicy>,
    /// Weights to start from; a missing or mismatched file aborts the run.
    #[arg(long, conflicts_with = "from_scratch")]
    pub weights_in: Option<PathBuf>,
    /// Train from randomly initialised weights instead of `--weights-in`.
    #[arg(long)]
    pub from_scratch: bool,
    /// Where to write the weights after the last iteration.
    #[arg(long)]
    pub weights_out: Option<PathBuf>,
    /// Write the full run report as JSON.
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

/// Install the stderr `tracing` subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<RunReport> {
    validate_backend_choice(args.backend)?;

    let cfg = TrainConfig::resolve(&args)?;
    let model_cfg = SiameseClassifierConfig::default();
    cfg.validate(&model_cfg)?;
    tracing::debug!(?cfg, "resolved configuration");

    let records = load_labels(&cfg.labels_csv, &cfg.label_store())?;
    let index = FolderIndex::scan(&cfg.image_root, &cfg.extensions)?;

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let mut trainer = SiameseTrainer::new(model_cfg, cfg.optimizer);
    if let Some(seed) = cfg.seed {
        trainer = trainer.with_seed(seed);
    }
    match &cfg.weights_in {
        Some(path) => trainer.load_weights(path)?,
        None => tracing::warn!("no --weights-in given; training from randomly initialised weights"),
    }

    let mut eval = EvaluationLoop::new(&records, &index, cfg.loop_settings());
    let report = eval.run(&mut trainer, &mut rng)?;

    println!("{report}");

    if let Some(path) = &cfg.report_json {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote run report");
    }
    if let Some(path) = &cfg.weights_out {
        trainer.save_weights(path)?;
    }
    Ok(report)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
