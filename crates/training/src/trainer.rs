//! The trainer interface the evaluation loop drives, and its burn implementation.

use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::module::{AutodiffModule, Module};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, Sgd, SgdConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use models::{SiameseClassifier, SiameseClassifierConfig};
use pair_dataset::PairBatch;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::{ADBackend, TrainBackend};

/// Extension the weights recorder writes.
pub const WEIGHTS_EXTENSION: &str = "bin";

/// Path the recorder actually reads or writes for `path`.
///
/// A bare path gets `.bin` appended; any other extension is refused because the recorder
/// would silently swap it for `.bin`.
pub fn weights_file(path: &Path) -> Result<PathBuf, ConfigError> {
    match path.extension() {
        None => Ok(path.with_extension(WEIGHTS_EXTENSION)),
        Some(ext) if ext == WEIGHTS_EXTENSION => Ok(path.to_path_buf()),
        Some(ext) => Err(ConfigError::Invalid(format!(
            "weights path {} has extension .{}; only .{WEIGHTS_EXTENSION} weights are supported",
            path.display(),
            ext.to_string_lossy()
        ))),
    }
}

/// Shape record written next to a weights file, e.g. `model.bin` -> `model.shape.json`.
pub fn shape_file(weights: &Path) -> PathBuf {
    weights.with_extension("shape.json")
}

/// Architecture a weights file was saved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsShape {
    pub channels: Vec<usize>,
    pub hidden: usize,
}

impl From<&SiameseClassifierConfig> for WeightsShape {
    fn from(cfg: &SiameseClassifierConfig) -> Self {
        Self {
            channels: cfg.channels.clone(),
            hidden: cfg.hidden,
        }
    }
}

/// Resolve the weights file for `path` and check it was saved from `model`'s architecture.
pub fn check_weights(path: &Path, model: &SiameseClassifierConfig) -> Result<PathBuf, ConfigError> {
    let file = weights_file(path)?;
    if !file.is_file() {
        return Err(ConfigError::MissingWeights(file));
    }
    let incompatible = |reason: String| ConfigError::IncompatibleWeights {
        path: file.clone(),
        reason,
    };
    let record = shape_file(&file);
    let raw = std::fs::read_to_string(&record)
        .map_err(|e| incompatible(format!("cannot read shape record {}: {e}", record.display())))?;
    let saved: WeightsShape = serde_json::from_str(&raw)
        .map_err(|e| incompatible(format!("bad shape record {}: {e}", record.display())))?;
    let expected = WeightsShape::from(model);
    if saved != expected {
        return Err(incompatible(format!(
            "saved with channels {:?} hidden {}, classifier expects channels {:?} hidden {}",
            saved.channels, saved.hidden, expected.channels, expected.hidden
        )));
    }
    Ok(file)
}

/// A binary pair classifier that can be trained incrementally.
///
/// Calling `fit` repeatedly continues training the same model; nothing is reset between calls.
pub trait PairClassifier {
    fn fit(&mut self, train: &PairBatch, validation: &PairBatch) -> anyhow::Result<FitReport>;

    /// Change probability in `[0, 1]` for every pair, in batch order.
    fn predict(&self, pairs: &PairBatch) -> anyhow::Result<Vec<f32>>;

    fn load_weights(&mut self, path: &Path) -> anyhow::Result<()>;

    fn save_weights(&self, path: &Path) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLoss {
    pub epoch: usize,
    pub train_loss: f32,
    pub validation_loss: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub epochs: Vec<EpochLoss>,
    /// Optimizer steps taken over the trainer's lifetime when the fit finished.
    pub total_steps: u64,
    pub final_learning_rate: f64,
}

impl FitReport {
    pub fn last_train_loss(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.train_loss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub learning_rate: f64,
    /// Time-based decay: the rate at step `t` is `learning_rate / (1 + decay * t)`.
    pub decay: f64,
    pub momentum: f64,
    pub nesterov: bool,
    pub batch_size: usize,
    pub epochs: usize,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            decay: 1e-6,
            momentum: 0.5,
            nesterov: true,
            batch_size: 9,
            epochs: 10,
        }
    }
}

impl OptimizerSettings {
    pub fn learning_rate_at(&self, step: u64) -> f64 {
        self.learning_rate / (1.0 + self.decay * step as f64)
    }

    fn sgd(&self) -> SgdConfig {
        let momentum = (self.momentum > 0.0).then(|| {
            MomentumConfig::new()
                .with_momentum(self.momentum)
                .with_dampening(0.0)
                .with_nesterov(self.nesterov)
        });
        SgdConfig::new().with_momentum(momentum)
    }
}

type SiameseOptimizer =
    OptimizerAdaptor<Sgd<TrainBackend>, SiameseClassifier<ADBackend>, ADBackend>;

/// Siamese classifier trained with mini-batch SGD on binary cross-entropy.
pub struct SiameseTrainer {
    model: SiameseClassifier<ADBackend>,
    optim: SiameseOptimizer,
    model_cfg: SiameseClassifierConfig,
    settings: OptimizerSettings,
    device: <ADBackend as Backend>::Device,
    steps: u64,
    rng: StdRng,
}

impl SiameseTrainer {
    pub fn new(model_cfg: SiameseClassifierConfig, settings: OptimizerSettings) -> Self {
        let device = <ADBackend as Backend>::Device::default();
        let model = SiameseClassifier::<ADBackend>::new(model_cfg.clone(), &device);
        let optim = settings.sgd().init::<ADBackend, SiameseClassifier<ADBackend>>();
        Self {
            model,
            optim,
            model_cfg,
            settings,
            device,
            steps: 0,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Make mini-batch shuffling reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn model_config(&self) -> &SiameseClassifierConfig {
        &self.model_cfg
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn current_learning_rate(&self) -> f64 {
        self.settings.learning_rate_at(self.steps)
    }

    fn check_side(&self, batch: &PairBatch) -> anyhow::Result<()> {
        let min = self.model_cfg.min_side();
        if batch.side < min {
            anyhow::bail!(
                "image side {} is smaller than the {} pixels the classifier needs",
                batch.side,
                min
            );
        }
        Ok(())
    }

    fn validation_loss(&self, validation: &PairBatch) -> anyhow::Result<Option<f32>> {
        if validation.is_empty() {
            return Ok(None);
        }
        let model = self.model.valid();
        let device = <TrainBackend as Backend>::Device::default();
        let order: Vec<usize> = (0..validation.len()).collect();
        let mut weighted = 0.0f64;
        for chunk in order.chunks(self.settings.batch_size.max(1)) {
            let (first, second, targets) = pair_tensors::<TrainBackend>(validation, chunk, &device);
            let probs = model.forward_probability(first, second);
            weighted += scalar(binary_cross_entropy(probs, targets))? as f64 * chunk.len() as f64;
        }
        Ok(Some((weighted / validation.len() as f64) as f32))
    }
}

impl PairClassifier for SiameseTrainer {
    fn fit(&mut self, train: &PairBatch, validation: &PairBatch) -> anyhow::Result<FitReport> {
        if train.is_empty() {
            anyhow::bail!("cannot fit on an empty training batch");
        }
        self.check_side(train)?;
        let batch_size = self.settings.batch_size.max(1);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut report = FitReport::default();

        for epoch in 0..self.settings.epochs {
            order.shuffle(&mut self.rng);
            let mut weighted = 0.0f64;
            for chunk in order.chunks(batch_size) {
                let (first, second, targets) = pair_tensors::<ADBackend>(train, chunk, &self.device);
                let probs = self.model.forward_probability(first, second);
                let loss = binary_cross_entropy(probs, targets);
                let loss_detached = loss.clone().detach();
                let grads = GradientsParams::from_grads(loss.backward(), &self.model);
                let lr = self.settings.learning_rate_at(self.steps);
                self.model = self.optim.step(lr, self.model.clone(), grads);
                self.steps += 1;
                weighted += scalar(loss_detached)? as f64 * chunk.len() as f64;
            }
            let train_loss = (weighted / train.len() as f64) as f32;
            if !train_loss.is_finite() {
                anyhow::bail!("training loss diverged at epoch {epoch}");
            }
            let validation_loss = self.validation_loss(validation)?;
            tracing::info!(
                epoch,
                train_loss,
                validation_loss = validation_loss.unwrap_or(f32::NAN),
                lr = self.current_learning_rate(),
                "epoch finished"
            );
            report.epochs.push(EpochLoss {
                epoch,
                train_loss,
                validation_loss,
            });
        }
        report.total_steps = self.steps;
        report.final_learning_rate = self.current_learning_rate();
        Ok(report)
    }

    fn predict(&self, pairs: &PairBatch) -> anyhow::Result<Vec<f32>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        self.check_side(pairs)?;
        let model = self.model.valid();
        let device = <TrainBackend as Backend>::Device::default();
        let order: Vec<usize> = (0..pairs.len()).collect();
        let mut out = Vec::with_capacity(pairs.len());
        for chunk in order.chunks(self.settings.batch_size.max(1)) {
            let (first, second, _) = pair_tensors::<TrainBackend>(pairs, chunk, &device);
            let probs = model.forward_probability(first, second);
            let values = probs
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| anyhow::anyhow!("failed to read predictions: {e:?}"))?;
            out.extend(values);
        }
        Ok(out)
    }

    fn load_weights(&mut self, path: &Path) -> anyhow::Result<()> {
        let file = check_weights(path, &self.model_cfg)?;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model = self
            .model
            .clone()
            .load_file(file.as_path(), &recorder, &self.device)
            .map_err(|e| anyhow::anyhow!("failed to load weights: {e}"))
            .with_context(|| format!("loading {}", file.display()))?;
        tracing::info!(path = %file.display(), "loaded classifier weights");
        Ok(())
    }

    fn save_weights(&self, path: &Path) -> anyhow::Result<()> {
        let file = weights_file(path)?;
        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model
            .clone()
            .save_file(file.as_path(), &recorder)
            .map_err(|e| anyhow::anyhow!("failed to save weights: {e}"))?;
        let record = shape_file(&file);
        let shape = serde_json::to_string_pretty(&WeightsShape::from(&self.model_cfg))?;
        std::fs::write(&record, shape).with_context(|| format!("writing {}", record.display()))?;
        tracing::info!(path = %file.display(), "saved classifier weights");
        Ok(())
    }
}

/// First images, second images and `[B, 1]` targets for the selected pairs.
fn pair_tensors<B: Backend>(
    batch: &PairBatch,
    indices: &[usize],
    device: &B::Device,
) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 2>) {
    let side = batch.side as usize;
    let image_len = batch.image_len();
    let mut first = Vec::with_capacity(indices.len() * image_len);
    let mut second = Vec::with_capacity(indices.len() * image_len);
    let mut targets = Vec::with_capacity(indices.len());
    for &i in indices {
        first.extend_from_slice(batch.first_image(i));
        second.extend_from_slice(batch.second_image(i));
        targets.push(batch.labels[i].as_f32());
    }
    let n = indices.len();
    let first = Tensor::<B, 4>::from_data(TensorData::new(first, [n, 3, side, side]), device);
    let second = Tensor::<B, 4>::from_data(TensorData::new(second, [n, 3, side, side]), device);
    let targets = Tensor::<B, 2>::from_data(TensorData::new(targets, [n, 1]), device);
    (first, second, targets)
}

/// Mean BCE over sigmoid outputs; probabilities are clamped away from 0 and 1.
fn binary_cross_entropy<B: Backend>(probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let eps = 1e-6;
    let probs = probs.clamp(eps, 1.0 - eps);
    let inv_targets = targets.clone().neg().add_scalar(1.0);
    let inv_probs = probs.clone().neg().add_scalar(1.0);
    (targets * probs.log() + inv_targets * inv_probs.log())
        .neg()
        .mean()
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> anyhow::Result<f32> {
    let values = t
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("failed to read loss: {e:?}"))?;
    values.first().copied().context("loss tensor is empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learning_rate_decays_with_steps() {
        let s = OptimizerSettings {
            learning_rate: 0.1,
            decay: 0.5,
            ..Default::default()
        };
        assert_eq!(s.learning_rate_at(0), 0.1);
        assert!((s.learning_rate_at(2) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn weights_file_uses_recorder_extension() {
        assert_eq!(weights_file(Path::new("out/model")).unwrap(), PathBuf::from("out/model.bin"));
        assert_eq!(weights_file(Path::new("m.bin")).unwrap(), PathBuf::from("m.bin"));
        assert_eq!(shape_file(Path::new("out/model.bin")), PathBuf::from("out/model.shape.json"));
    }

    #[test]
    fn foreign_weights_extension_is_refused() {
        let err = weights_file(Path::new("vgg19_siamese.h5")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains(".h5"));
    }

    #[test]
    fn scalar_of_empty_tensor_is_an_error() {
        type B = TrainBackend;
        let device = Default::default();
        let empty = Tensor::<B, 1>::from_data(TensorData::new(Vec::<f32>::new(), [0]), &device);
        assert!(scalar(empty).is_err());
    }

    #[test]
    fn bce_matches_closed_form() {
        type B = TrainBackend;
        let device = Default::default();
        let probs = Tensor::<B, 2>::from_data(TensorData::new(vec![0.8f32, 0.4], [2, 1]), &device);
        let targets =
            Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [2, 1]), &device);
        let got = scalar(binary_cross_entropy(probs, targets)).unwrap();
        let want = -((0.8f32).ln() + (0.6f32).ln()) / 2.0;
        assert!((got - want).abs() < 1e-5);
    }

    #[test]
    fn tensors_follow_selected_order() {
        type B = TrainBackend;
        let mut batch = PairBatch::new(1);
        batch
            .push("a", &[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], pair_dataset::ChangeLabel::Positive)
            .unwrap();
        batch
            .push("b", &[7.0, 8.0, 9.0], &[0.0, 0.0, 0.0], pair_dataset::ChangeLabel::Negative)
            .unwrap();
        let device = Default::default();
        let (first, second, targets) = pair_tensors::<B>(&batch, &[1, 0], &device);
        assert_eq!(first.dims(), [2, 3, 1, 1]);
        assert_eq!(
            first.into_data().to_vec::<f32>().unwrap(),
            vec![7.0, 8.0, 9.0, 1.0, 2.0, 3.0]
        );
        assert_eq!(second.into_data().to_vec::<f32>().unwrap()[3], 4.0);
        assert_eq!(targets.into_data().to_vec::<f32>().unwrap(), vec![0.0, 1.0]);
    }
}
