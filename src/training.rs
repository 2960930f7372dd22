use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::transform::ShuffledDataset,
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{ElementConversion, backend::AutodiffBackend},
};

use crate::{
    data::{SteeringBatch, SteeringBatcher},
    dataset::{DatasetSplit, DrivingDataset, SteeringItem},
    error::Error,
    model::{SteeringModel, SteeringModelConfig},
    preprocess::PreprocessConfig,
};

/// Stem of the persisted model; the recorder adds `.mpk`, the config `.json`.
pub static ARTIFACT_PATH: &str = "model";

type ModelRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

#[derive(Config)]
pub struct TrainingConfig {
    #[config(default = "PreprocessConfig::new()")]
    pub preprocess: PreprocessConfig,
    #[config(default = "SteeringModelConfig::new()")]
    pub model: SteeringModelConfig,
    #[config(default = "AdamConfig::new().with_epsilon(1e-7)")]
    pub optimizer: AdamConfig,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Trailing fraction of the dataset held out for validation.
    #[config(default = 0.1)]
    pub validation_split: f64,
    /// Epochs without validation improvement before training stops.
    #[config(default = 2)]
    pub patience: usize,
    #[config(default = 0.0)]
    pub min_delta: f64,
    #[config(default = "String::from(ARTIFACT_PATH)")]
    pub artifact_path: String,
}

/// Stops training once validation loss has not improved for `patience`
/// consecutive epochs. The best weights are not restored.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Records one epoch's validation loss; returns `true` when training
    /// should stop.
    pub fn should_stop(&mut self, loss: f64) -> bool {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.wait = 0;
            return false;
        }

        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn best(&self) -> Option<f64> {
        self.best.is_finite().then_some(self.best)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingOutcome {
    Completed,
    EarlyStopped { epoch: usize },
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub epochs: Vec<EpochMetrics>,
    pub outcome: TrainingOutcome,
    /// Where the model weights were written.
    pub artifact: PathBuf,
}

/// Sample-weighted running mean of per-batch losses.
#[derive(Debug, Default)]
struct LossMeter {
    sum: f64,
    count: usize,
}

impl LossMeter {
    fn update(&mut self, loss: f64, batch_size: usize) {
        self.sum += loss * batch_size as f64;
        self.count += batch_size;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Fits `model` to `dataset` and persists the result under
/// `config.artifact_path`, whether training ran every epoch or stopped early.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    model: SteeringModel<B>,
    dataset: DrivingDataset,
    device: &B::Device,
) -> crate::Result<(SteeringModel<B>, TrainingReport)> {
    B::seed(config.seed);

    let image_shape = dataset.image_shape();
    if image_shape != model.input_shape() || image_shape != config.model.input_shape {
        return Err(Error::ShapeMismatch {
            expected: model.input_shape().to_vec(),
            actual: image_shape.to_vec(),
        });
    }

    let dataset = Arc::new(dataset);
    let (train_split, valid_split) = dataset.split_validation(config.validation_split)?;
    if train_split.range().is_empty() || valid_split.range().is_empty() {
        return Err(Error::Validation(format!(
            "{} samples leave an empty split at validation fraction {}",
            dataset.len(),
            config.validation_split
        )));
    }
    log::info!(
        "Training on {} samples, validating on {}",
        train_split.range().len(),
        valid_split.range().len()
    );

    let batcher = SteeringBatcher::new(image_shape);
    let dataloader_valid: Arc<dyn DataLoader<B::InnerBackend, SteeringBatch<B::InnerBackend>>> =
        DataLoaderBuilder::new(batcher.clone())
            .batch_size(config.batch_size)
            .num_workers(config.num_workers)
            .set_device(device.clone())
            .build(valid_split);

    let mut optimizer = config.optimizer.init::<B, SteeringModel<B>>();
    let mut early_stopping = EarlyStopping::new(config.patience, config.min_delta);
    let mut model = model;
    let mut epochs = Vec::with_capacity(config.num_epochs);
    let mut outcome = TrainingOutcome::Completed;

    for epoch in 1..=config.num_epochs {
        let dataloader_train = epoch_loader::<B>(&train_split, &batcher, config, epoch, device);
        let mut train_loss = LossMeter::default();
        for batch in dataloader_train.iter() {
            let batch_size = batch.targets.dims()[0];
            let (loss, _) = model.forward_loss(batch);
            train_loss.update(loss.clone().into_scalar().elem::<f64>(), batch_size);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);
        }

        let model_valid = model.valid();
        let mut valid_loss = LossMeter::default();
        for batch in dataloader_valid.iter() {
            let batch_size = batch.targets.dims()[0];
            let (loss, _) = model_valid.forward_loss(batch);
            valid_loss.update(loss.into_scalar().elem::<f64>(), batch_size);
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss: train_loss.mean(),
            valid_loss: valid_loss.mean(),
        };
        log::info!(
            "Epoch {epoch}/{}: loss {:.5}, val_loss {:.5}",
            config.num_epochs,
            metrics.train_loss,
            metrics.valid_loss
        );
        epochs.push(metrics);

        if early_stopping.should_stop(metrics.valid_loss) {
            log::info!(
                "Epoch {epoch}: early stopping, best val_loss {:.5}",
                early_stopping.best().unwrap_or(f64::NAN)
            );
            outcome = TrainingOutcome::EarlyStopped { epoch };
            break;
        }
    }

    let artifact = save_model(config, model.clone())?;
    log::info!("Model saved to {}", artifact.display());

    Ok((
        model,
        TrainingReport {
            epochs,
            outcome,
            artifact,
        },
    ))
}

/// Loader over the whole training split, reshuffled with a seed derived from
/// `epoch`. Worker partitions are cut after the shuffle, so any batch can mix
/// samples from anywhere in the split.
fn epoch_loader<B: Backend>(
    split: &DatasetSplit,
    batcher: &SteeringBatcher,
    config: &TrainingConfig,
    epoch: usize,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, SteeringBatch<B>>> {
    let shuffled: ShuffledDataset<DatasetSplit, SteeringItem> =
        ShuffledDataset::with_seed(split.clone(), config.seed.wrapping_add(epoch as u64));

    DataLoaderBuilder::new(batcher.clone())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(shuffled)
}

/// Writes the weights and the configuration that rebuilds them.
fn save_model<B: Backend>(
    config: &TrainingConfig,
    model: SteeringModel<B>,
) -> crate::Result<PathBuf> {
    let stem = PathBuf::from(&config.artifact_path);
    let config_path = stem.with_extension("json");
    config.save(&config_path).map_err(|source| Error::Io {
        path: config_path,
        source,
    })?;

    model.save_file(stem.clone(), &ModelRecorder::new())?;
    Ok(stem.with_extension("mpk"))
}

/// Restores a model persisted by [`train`] from its artifact stem.
pub fn load_model<B: Backend>(
    artifact_path: impl AsRef<Path>,
    device: &B::Device,
) -> crate::Result<SteeringModel<B>> {
    let stem = artifact_path.as_ref();
    let config_path = stem.with_extension("json");
    let config = TrainingConfig::load(&config_path)
        .map_err(|err| Error::Config(format!("{}: {err}", config_path.display())))?;

    let model = config
        .model
        .init::<B>(device)?
        .load_file(stem.to_path_buf(), &ModelRecorder::new(), device)?;
    Ok(model)
}
