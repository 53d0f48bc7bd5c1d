//! Repeated resample / train / evaluate iterations over one label set.
//!
//! Every iteration draws a fresh balanced sample (new random negatives), so the persistent
//! model keeps seeing different negatives while all positives are reused. Test kappas and
//! confusion matrices are accumulated into a [`RunReport`].

use anyhow::Context;
use pair_dataset::{
    prepare, BalancedSampler, FolderIndex, IntegrityPolicy, LabelRecord, LoadStats, PairLoader,
    SplitRatios, DEFAULT_PER_CLASS_CAP,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metrics::{binarize, mean_std, ConfusionMatrix, DEFAULT_THRESHOLD};
use crate::trainer::{FitReport, PairClassifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Sampling,
    Loading,
    Preparing,
    Training,
    Evaluating,
    Accumulating,
    Done,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Sampling => "sampling",
            LoopState::Loading => "loading",
            LoopState::Preparing => "preparing",
            LoopState::Training => "training",
            LoopState::Evaluating => "evaluating",
            LoopState::Accumulating => "accumulating",
            LoopState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopSettings {
    pub iterations: usize,
    pub per_class_cap: usize,
    /// Square side images are resized to.
    pub side: u32,
    pub threshold: f32,
    pub ratios: SplitRatios,
    pub policy: IntegrityPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            iterations: 25,
            per_class_cap: DEFAULT_PER_CLASS_CAP,
            side: 224,
            threshold: DEFAULT_THRESHOLD,
            ratios: SplitRatios::default(),
            policy: IntegrityPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationMetrics {
    pub iteration: usize,
    pub sampled: usize,
    pub load: LoadStats,
    pub train_size: usize,
    pub validation_size: usize,
    pub test_size: usize,
    pub train_kappa: f64,
    pub test_kappa: f64,
    pub confusion: ConfusionMatrix,
    pub fit: FitReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub test_kappas: Vec<f64>,
    /// Sum of every iteration's test confusion matrix.
    pub confusion: ConfusionMatrix,
    pub iterations: Vec<IterationMetrics>,
}

impl RunReport {
    pub fn kappa_mean(&self) -> f64 {
        mean_std(&self.test_kappas).0
    }

    /// Population standard deviation of the test kappas.
    pub fn kappa_std(&self) -> f64 {
        mean_std(&self.test_kappas).1
    }

    pub fn kappa_line(&self) -> String {
        format!(
            "Kappa: {:.10} (+/- {:.2})",
            self.kappa_mean(),
            self.kappa_std()
        )
    }

    fn record(&mut self, metrics: IterationMetrics) {
        self.test_kappas.push(metrics.test_kappa);
        self.confusion += metrics.confusion;
        self.iterations.push(metrics);
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kappa_line())?;
        write!(f, "{}", self.confusion)
    }
}

pub struct EvaluationLoop<'a> {
    records: &'a [LabelRecord],
    index: &'a FolderIndex,
    settings: LoopSettings,
    state: LoopState,
}

impl<'a> EvaluationLoop<'a> {
    pub fn new(records: &'a [LabelRecord], index: &'a FolderIndex, settings: LoopSettings) -> Self {
        Self {
            records,
            index,
            settings,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!(from = %self.state, to = %next, "evaluation loop transition");
        self.state = next;
    }

    /// Run every iteration against the same trainer, which is trained further each time.
    pub fn run<T, R>(&mut self, trainer: &mut T, rng: &mut R) -> anyhow::Result<RunReport>
    where
        T: PairClassifier + ?Sized,
        R: Rng + ?Sized,
    {
        let total = self.settings.iterations;
        let mut report = RunReport::default();
        for iteration in 0..total {
            println!("{:.2}", iteration as f64 / total as f64);
            let metrics = self
                .run_iteration(iteration, trainer, rng)
                .with_context(|| format!("iteration {iteration}"))?;
            tracing::info!(
                iteration,
                train_kappa = metrics.train_kappa,
                test_kappa = metrics.test_kappa,
                "iteration finished"
            );
            self.transition(LoopState::Accumulating);
            report.record(metrics);
        }
        self.transition(LoopState::Done);
        Ok(report)
    }

    pub fn run_iteration<T, R>(
        &mut self,
        iteration: usize,
        trainer: &mut T,
        rng: &mut R,
    ) -> anyhow::Result<IterationMetrics>
    where
        T: PairClassifier + ?Sized,
        R: Rng + ?Sized,
    {
        let settings = self.settings;

        self.transition(LoopState::Sampling);
        let sampler = BalancedSampler::new(settings.per_class_cap);
        let sampled = sampler.draw(self.records, rng)?;

        self.transition(LoopState::Loading);
        let loader = PairLoader::new(self.index, settings.side, settings.policy);
        let (batch, load) = loader.load(&sampled, settings.per_class_cap)?;

        self.transition(LoopState::Preparing);
        let splits = prepare(batch, &settings.ratios, rng)?;

        self.transition(LoopState::Training);
        let fit = trainer.fit(&splits.train, &splits.validation)?;

        self.transition(LoopState::Evaluating);
        let train_pred = binarize(&trainer.predict(&splits.train)?, settings.threshold);
        let test_pred = binarize(&trainer.predict(&splits.test)?, settings.threshold);
        let train_kappa = ConfusionMatrix::from_labels(&splits.train.labels, &train_pred).kappa();
        let confusion = ConfusionMatrix::from_labels(&splits.test.labels, &test_pred);

        Ok(IterationMetrics {
            iteration,
            sampled: sampled.len(),
            load,
            train_size: splits.train.len(),
            validation_size: splits.validation.len(),
            test_size: splits.test.len(),
            train_kappa,
            test_kappa: confusion.kappa(),
            confusion,
            fit,
        })
    }
}
