#![recursion_limit = "256"]

pub mod config;
pub mod eval_loop;
pub mod metrics;
pub mod trainer;
pub mod util;

pub use config::{ConfigError, TrainConfig};
pub use eval_loop::{EvaluationLoop, IterationMetrics, LoopSettings, LoopState, RunReport};
pub use metrics::{binarize, cohen_kappa, mean_std, ConfusionMatrix, DEFAULT_THRESHOLD};
pub use models::{SiameseClassifier, SiameseClassifierConfig};
pub use trainer::{
    check_weights, shape_file, weights_file, EpochLoss, FitReport, OptimizerSettings,
    PairClassifier, SiameseTrainer, WeightsShape,
};
pub use util::{run_train, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
