use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use pair_dataset::{
    default_extensions, DatasetError, FolderIndex, IntegrityPolicy, LabelRecord,
    PairBatch,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use training::{
    ConfusionMatrix, EpochLoss, EvaluationLoop, FitReport, LoopSettings, LoopState,
    PairClassifier,
};

/// Answers from the batch labels (or a constant), and counts how often it was trained.
struct ScriptedTrainer {
    fits: usize,
    constant: Option<f32>,
}

impl ScriptedTrainer {
    fn oracle() -> Self {
        Self {
            fits: 0,
            constant: None,
        }
    }

    fn always(p: f32) -> Self {
        Self {
            fits: 0,
            constant: Some(p),
        }
    }
}

impl PairClassifier for ScriptedTrainer {
    fn fit(&mut self, train: &PairBatch, validation: &PairBatch) -> anyhow::Result<FitReport> {
        assert!(!train.is_empty());
        assert!(!validation.is_empty());
        self.fits += 1;
        Ok(FitReport {
            epochs: vec![EpochLoss {
                epoch: 0,
                train_loss: 1.0 / self.fits as f32,
                validation_loss: None,
            }],
            total_steps: self.fits as u64,
            final_learning_rate: 1e-3,
        })
    }

    fn predict(&self, pairs: &PairBatch) -> anyhow::Result<Vec<f32>> {
        Ok(match self.constant {
            Some(p) => vec![p; pairs.len()],
            None => pairs.label_values(),
        })
    }

    fn load_weights(&mut self, _path: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn save_weights(&self, _path: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

fn image_root(root: &Path, folders: usize, images: usize) -> anyhow::Result<PathBuf> {
    for f in 0..folders {
        let dir = root.join(format!("loc_{f:02}"));
        fs::create_dir_all(&dir)?;
        for i in 0..images {
            let img = RgbImage::from_pixel(10, 10, Rgb([(i * 30) as u8, (f * 90) as u8, 60]));
            img.save(dir.join(format!("{i:03}.jpg")))?;
        }
    }
    Ok(root.to_path_buf())
}

/// 6 positives and 10 negatives spread over two folders of 8 images.
fn records() -> Vec<LabelRecord> {
    (0..16)
        .map(|n| {
            let label = if n % 8 < 3 { "yes" } else { "no" };
            LabelRecord::new(format!("{}-{}-2017", n / 8, n % 7), label)
        })
        .collect()
}

fn settings(iterations: usize) -> LoopSettings {
    LoopSettings {
        iterations,
        side: 8,
        ..Default::default()
    }
}

#[test]
fn oracle_trainer_scores_perfect_kappa() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = FolderIndex::scan(&image_root(tmp.path(), 2, 8)?, &default_extensions())?;
    let records = records();
    let mut eval = EvaluationLoop::new(&records, &index, settings(3));
    assert_eq!(eval.state(), LoopState::Idle);

    let mut trainer = ScriptedTrainer::oracle();
    let mut rng = StdRng::seed_from_u64(42);
    let report = eval.run(&mut trainer, &mut rng)?;

    assert_eq!(eval.state(), LoopState::Done);
    assert_eq!(trainer.fits, 3);
    assert_eq!(report.test_kappas, vec![1.0, 1.0, 1.0]);
    assert_eq!(report.kappa_mean(), 1.0);
    assert_eq!(report.kappa_std(), 0.0);
    assert_eq!(report.confusion.false_positives(), 0);
    assert_eq!(report.confusion.false_negatives(), 0);
    for (i, it) in report.iterations.iter().enumerate() {
        assert_eq!(it.iteration, i);
        // The same trainer keeps training: its step counter carries over.
        assert_eq!(it.fit.total_steps, i as u64 + 1);
        assert_eq!(it.sampled, 12);
        assert_eq!((it.train_size, it.validation_size, it.test_size), (7, 1, 4));
        assert_eq!(it.train_kappa, 1.0);
    }
    Ok(())
}

#[test]
fn confusion_total_is_sum_of_iterations() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = FolderIndex::scan(&image_root(tmp.path(), 2, 8)?, &default_extensions())?;
    let records = records();
    let mut eval = EvaluationLoop::new(&records, &index, settings(4));
    let mut trainer = ScriptedTrainer::always(0.9);
    let report = eval.run(&mut trainer, &mut StdRng::seed_from_u64(7))?;

    let summed: ConfusionMatrix = report.iterations.iter().map(|it| it.confusion).sum();
    assert_eq!(report.confusion, summed);
    assert_eq!(report.confusion.total(), 16);
    // Nothing is ever predicted negative.
    assert_eq!(report.confusion.true_negatives(), 0);
    assert_eq!(report.confusion.false_negatives(), 0);
    assert_eq!(report.test_kappas.len(), 4);
    Ok(())
}

#[test]
fn no_positives_aborts_the_run() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = FolderIndex::scan(&image_root(tmp.path(), 1, 4)?, &default_extensions())?;
    let records = vec![
        LabelRecord::new("0-0-a", "no"),
        LabelRecord::new("0-1-b", "no"),
    ];
    let mut eval = EvaluationLoop::new(&records, &index, settings(2));
    let err = eval
        .run(&mut ScriptedTrainer::oracle(), &mut StdRng::seed_from_u64(1))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::DegenerateSample(_))
    ));
    assert_eq!(eval.state(), LoopState::Sampling);
    Ok(())
}

#[test]
fn integrity_policy_decides_bad_identifiers() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = FolderIndex::scan(&image_root(tmp.path(), 2, 8)?, &default_extensions())?;
    let mut records = records();
    records.push(LabelRecord::new("7-0-nowhere", "yes"));

    let mut strict = settings(1);
    strict.policy = IntegrityPolicy::Fail;
    let mut eval = EvaluationLoop::new(&records, &index, strict);
    let err = eval
        .run(&mut ScriptedTrainer::oracle(), &mut StdRng::seed_from_u64(5))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::FolderOutOfRange { .. })
    ));

    let mut eval = EvaluationLoop::new(&records, &index, settings(1));
    let report = eval.run(&mut ScriptedTrainer::oracle(), &mut StdRng::seed_from_u64(5))?;
    let it = &report.iterations[0];
    assert_eq!(it.load.unresolved, 1);
    assert_eq!(it.load.loaded, 12);
    assert_eq!(it.load.pruned, 1);
    assert_eq!(report.test_kappas, vec![1.0]);
    Ok(())
}

#[test]
fn every_split_sees_a_balanced_sample() -> anyhow::Result<()> {
    #[derive(Default)]
    struct Counting {
        fitted_positives: Vec<usize>,
    }
    impl PairClassifier for Counting {
        fn fit(&mut self, train: &PairBatch, validation: &PairBatch) -> anyhow::Result<FitReport> {
            let (_, train_pos) = train.class_counts();
            let (_, val_pos) = validation.class_counts();
            self.fitted_positives.push(train_pos + val_pos);
            Ok(FitReport::default())
        }
        fn predict(&self, pairs: &PairBatch) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.0; pairs.len()])
        }
        fn load_weights(&mut self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
        fn save_weights(&self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let tmp = tempfile::tempdir()?;
    let index = FolderIndex::scan(&image_root(tmp.path(), 2, 8)?, &default_extensions())?;
    let records = records();
    let mut eval = EvaluationLoop::new(&records, &index, settings(2));
    let mut trainer = Counting::default();
    let report = eval.run(&mut trainer, &mut StdRng::seed_from_u64(9))?;

    for it in &report.iterations {
        assert_eq!(it.train_size + it.validation_size + it.test_size, 12);
    }
    // Six positives per iteration; whatever fit did not see landed in the test split.
    let held_out_positives: usize = trainer.fitted_positives.iter().map(|p| 6 - p).sum();
    let c = report.confusion;
    assert_eq!(c.false_negatives() + c.true_positives(), held_out_positives as u64);
    assert_eq!(c.total(), 8);
    assert_eq!(c.false_positives() + c.true_positives(), 0);
    Ok(())
}
