use pair_dataset::{ChangeLabel, PairBatch};
use training::{
    ConfigError, OptimizerSettings, PairClassifier, SiameseClassifierConfig, SiameseTrainer,
    TrainConfig,
};

fn tiny_model() -> SiameseClassifierConfig {
    SiameseClassifierConfig {
        channels: vec![4, 8],
        hidden: 8,
    }
}

fn tiny_settings() -> OptimizerSettings {
    OptimizerSettings {
        batch_size: 3,
        epochs: 2,
        ..Default::default()
    }
}

/// Positives get a bright second image, negatives an identical one.
fn synthetic_batch(side: u32, n: usize) -> anyhow::Result<PairBatch> {
    let len = 3 * side as usize * side as usize;
    let mut batch = PairBatch::new(side);
    for i in 0..n {
        let label = ChangeLabel::from_bool(i % 2 == 0);
        let first = vec![0.1 * i as f32; len];
        let second = if label.is_positive() {
            vec![1.0; len]
        } else {
            first.clone()
        };
        batch.push(format!("0-{i}"), &first, &second, label)?;
    }
    Ok(batch)
}

#[test]
fn fit_reports_finite_losses_and_predicts_probabilities() -> anyhow::Result<()> {
    let train = synthetic_batch(8, 6)?;
    let validation = synthetic_batch(8, 2)?;
    let mut trainer = SiameseTrainer::new(tiny_model(), tiny_settings()).with_seed(3);

    let report = trainer.fit(&train, &validation)?;
    assert_eq!(report.epochs.len(), 2);
    for epoch in &report.epochs {
        assert!(epoch.train_loss.is_finite());
        assert!(epoch.validation_loss.is_some_and(f32::is_finite));
    }
    // Two mini-batches of three per epoch.
    assert_eq!(report.total_steps, 4);
    assert!(report.final_learning_rate < trainer.settings().learning_rate);

    let probs = trainer.predict(&train)?;
    assert_eq!(probs.len(), train.len());
    assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));

    // A second fit keeps going from the same optimizer state.
    let again = trainer.fit(&train, &validation)?;
    assert_eq!(again.total_steps, 8);
    Ok(())
}

#[test]
fn weights_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("classifier.bin");
    let pairs = synthetic_batch(8, 4)?;

    let mut trainer = SiameseTrainer::new(tiny_model(), tiny_settings()).with_seed(11);
    trainer.fit(&pairs, &PairBatch::new(8))?;
    trainer.save_weights(&path)?;
    assert!(path.is_file());
    assert!(tmp.path().join("classifier.shape.json").is_file());
    let before = trainer.predict(&pairs)?;

    let mut restored = SiameseTrainer::new(tiny_model(), tiny_settings());
    restored.load_weights(&path)?;
    let after = restored.predict(&pairs)?;
    for (a, b) in before.iter().zip(&after) {
        assert!((a - b).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn missing_weights_are_an_error() {
    let mut trainer = SiameseTrainer::new(tiny_model(), tiny_settings());
    assert!(trainer
        .load_weights(std::path::Path::new("/nonexistent/weights.bin"))
        .is_err());
}

fn save_tiny_weights(dir: &std::path::Path) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join("tiny");
    SiameseTrainer::new(tiny_model(), tiny_settings()).save_weights(&path)?;
    Ok(path)
}

fn assert_incompatible(err: anyhow::Error) {
    assert!(
        matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::IncompatibleWeights { .. })
        ),
        "unexpected error: {err:#}"
    );
}

#[test]
fn weights_from_a_shallower_model_are_refused() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = save_tiny_weights(tmp.path())?;
    let deeper = SiameseClassifierConfig {
        channels: vec![4, 8, 16],
        hidden: 8,
    };
    let mut trainer = SiameseTrainer::new(deeper, tiny_settings());
    assert_incompatible(trainer.load_weights(&path).unwrap_err());
    Ok(())
}

#[test]
fn weights_from_a_narrower_model_are_refused() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = save_tiny_weights(tmp.path())?;
    let wider = SiameseClassifierConfig {
        channels: vec![8, 16],
        hidden: 8,
    };
    let mut trainer = SiameseTrainer::new(wider, tiny_settings());
    assert_incompatible(trainer.load_weights(&path).unwrap_err());

    let wider_head = SiameseClassifierConfig {
        channels: vec![4, 8],
        hidden: 16,
    };
    let mut trainer = SiameseTrainer::new(wider_head, tiny_settings());
    assert_incompatible(trainer.load_weights(&path).unwrap_err());
    Ok(())
}

#[test]
fn weights_without_shape_record_are_refused() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = save_tiny_weights(tmp.path())?;
    std::fs::remove_file(tmp.path().join("tiny.shape.json"))?;
    let mut trainer = SiameseTrainer::new(tiny_model(), tiny_settings());
    assert_incompatible(trainer.load_weights(&path).unwrap_err());
    Ok(())
}

#[test]
fn startup_validation_catches_mismatched_weights() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = save_tiny_weights(tmp.path())?;
    let labels = tmp.path().join("train.csv");
    std::fs::write(&labels, "id,a,b,c,d,vote\n")?;
    let cfg = TrainConfig {
        labels_csv: labels,
        image_root: tmp.path().to_path_buf(),
        weights_in: Some(path),
        ..Default::default()
    };
    assert!(matches!(
        cfg.validate(&SiameseClassifierConfig::default()),
        Err(ConfigError::IncompatibleWeights { .. })
    ));
    cfg.validate(&tiny_model())?;
    Ok(())
}

#[test]
fn foreign_weights_extension_is_not_rewritten() {
    let mut trainer = SiameseTrainer::new(tiny_model(), tiny_settings());
    let err = trainer
        .load_weights(std::path::Path::new("vgg19_siamese.h5"))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::Invalid(_))
    ));
}

#[test]
fn undersized_images_are_rejected() -> anyhow::Result<()> {
    let mut trainer = SiameseTrainer::new(tiny_model(), tiny_settings());
    let small = synthetic_batch(2, 3)?;
    assert!(trainer.fit(&small, &PairBatch::new(2)).is_err());
    Ok(())
}
