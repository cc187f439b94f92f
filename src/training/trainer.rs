/// Training loop for the sequence-to-sequence autoencoders
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use ndarray::{concatenate, s, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::checkpoint::{CheckpointMetadata, CheckpointStore, SafetensorsStore};
use crate::config::Seq2seqConfig;
use crate::data::FeatureDataset;
use crate::export::ExportSink;
use crate::layers::ForwardMode;
use crate::models::{EpochLosses, ParamRegistry, Seq2seqAutoencoder};
use crate::utils::{all_finite, array_to_tensor, tensor_to_array2, tensor_to_array3};
use crate::{Result, Seq2seqError};

/// What gets recorded as `min_loss` when an epoch beats the best
/// reconstruction loss so far
///
/// The comparison always uses the epoch's `rec_loss`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BestLossRule {
    /// Record the combined loss (rec + latent). Later epochs are compared
    /// against that combined value.
    #[default]
    StoreCombined,
    /// Record the reconstruction loss itself
    StoreReconstruction,
}

impl BestLossRule {
    /// Value stored as the new `min_loss`
    pub fn stored(&self, losses: &EpochLosses) -> f32 {
        match self {
            BestLossRule::StoreCombined => losses.loss,
            BestLossRule::StoreReconstruction => losses.rec_loss,
        }
    }
}

/// Best-epoch bookkeeping under a [`BestLossRule`]
#[derive(Debug, Clone)]
pub struct BestTracker {
    rule: BestLossRule,
    min_loss: f32,
    best: Option<(usize, EpochLosses)>,
}

impl BestTracker {
    pub fn new(rule: BestLossRule) -> Self {
        Self {
            rule,
            min_loss: f32::MAX,
            best: None,
        }
    }

    /// Record an epoch. Returns true when its `rec_loss` is below the
    /// recorded minimum, i.e. when the epoch should be checkpointed.
    pub fn observe(&mut self, epoch: usize, losses: &EpochLosses) -> bool {
        if losses.rec_loss < self.min_loss {
            self.min_loss = self.rule.stored(losses);
            self.best = Some((epoch, *losses));
            true
        } else {
            false
        }
    }

    pub fn min_loss(&self) -> f32 {
        self.min_loss
    }

    /// Epoch and losses of the last improvement
    pub fn best(&self) -> Option<(usize, EpochLosses)> {
        self.best
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of epochs; one epoch is one optimizer update on one batch
    pub nb_epochs: usize,
    /// Dropout keep probability during training
    pub keep_prob: f64,
    /// Adam learning rate (fixed)
    pub learning_rate: f64,
    /// Seed for initialization, dropout and latent sampling
    pub seed: u64,
    /// Where checkpoints and the export go
    pub result_dir: PathBuf,
    /// Best-checkpoint rule
    pub best_rule: BestLossRule,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            nb_epochs: 5000,
            keep_prob: 0.8,
            learning_rate: 1e-3,
            seed: 0,
            result_dir: PathBuf::from("result"),
            best_rule: BestLossRule::default(),
        }
    }
}

impl TrainingConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.nb_epochs == 0 {
            return Err(Seq2seqError::Config("nb_epochs must be > 0".to_string()));
        }

        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(Seq2seqError::Config(format!(
                "keep_prob must be in (0, 1], got {}",
                self.keep_prob
            )));
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Seq2seqError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }

        Ok(())
    }
}

/// Where the trainer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Initializing,
    Training { epoch: usize },
    Evaluating,
    Terminated,
}

/// Outcome of [`Trainer::fit`]
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs: usize,
    /// Best value recorded under the configured [`BestLossRule`]
    pub min_loss: f32,
    /// Epoch the best checkpoint was taken at
    pub best_epoch: usize,
    /// Losses of the last epoch
    pub last: EpochLosses,
    pub best_path: PathBuf,
    pub final_path: PathBuf,
}

/// Deterministic pass over a whole dataset
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// [sample, timestep, feature]
    pub reconstruction: Array3<f32>,
    /// [sample, code_dim]
    pub codes: Array2<f32>,
}

/// Trainer for Seq2seqAutoencoder
pub struct Trainer<S: CheckpointStore = SafetensorsStore> {
    model: Seq2seqAutoencoder,
    registry: ParamRegistry,
    optimizer: AdamW,
    config: TrainingConfig,
    store: S,
    rng: StdRng,
    phase: TrainingPhase,
    device: Device,
}

impl Trainer<SafetensorsStore> {
    /// Create new trainer writing safetensors checkpoints
    pub fn new(model_config: Seq2seqConfig, training_config: TrainingConfig, device: Device) -> Result<Self> {
        Self::with_store(model_config, training_config, device, SafetensorsStore)
    }
}

impl<S: CheckpointStore> Trainer<S> {
    /// Create new trainer with a custom checkpoint store
    ///
    /// Builds the model, initializes its parameters from `training_config.seed`
    /// and hands every parameter to Adam.
    pub fn with_store(
        model_config: Seq2seqConfig,
        training_config: TrainingConfig,
        device: Device,
        store: S,
    ) -> Result<Self> {
        training_config.validate()?;

        let registry = ParamRegistry::new(DType::F32, &device);
        let model = Seq2seqAutoencoder::new(model_config, registry.var_builder())?;
        registry.initialize(training_config.seed)?;

        log::info!(
            "Built {} with {} parameters",
            model.name(),
            registry.num_parameters()?
        );

        let optimizer_params = ParamsAdamW {
            lr: training_config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(registry.all_vars()?, optimizer_params)?;

        let rng = StdRng::seed_from_u64(training_config.seed.wrapping_add(1));

        Ok(Self {
            model,
            registry,
            optimizer,
            config: training_config,
            store,
            rng,
            phase: TrainingPhase::Initializing,
            device,
        })
    }

    pub fn model(&self) -> &Seq2seqAutoencoder {
        &self.model
    }

    pub fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    /// `result_dir/<model name>.safetensors`
    pub fn best_path(&self) -> PathBuf {
        self.config
            .result_dir
            .join(format!("{}.safetensors", self.model.name()))
    }

    /// `result_dir/<model name>_minloss_<min_loss>.safetensors`
    pub fn final_path(&self, min_loss: f32) -> PathBuf {
        self.config
            .result_dir
            .join(format!("{}_minloss_{}.safetensors", self.model.name(), min_loss))
    }

    /// `result_dir/<model name>.npz`
    pub fn export_path(&self) -> PathBuf {
        self.config.result_dir.join(format!("{}.npz", self.model.name()))
    }

    fn epoch(&self) -> usize {
        match self.phase {
            TrainingPhase::Training { epoch } => epoch,
            _ => 0,
        }
    }

    /// One forward + backward + update on `batch`
    ///
    /// Returns the losses of the forward pass the update was computed from.
    /// A non-finite loss is reported before any parameter changes.
    pub fn step(&mut self, batch: &Array3<f32>) -> Result<EpochLosses> {
        let x = array_to_tensor(batch, &self.device)?;

        let mut mode = ForwardMode::train(self.config.keep_prob, &mut self.rng);
        let output = self.model.forward(&x, &mut mode)?;
        let report = self.model.compute_loss(&x, &output)?;
        let losses = report.to_scalars()?;

        if !all_finite(&[losses.loss, losses.rec_loss, losses.latent_loss]) {
            return Err(Seq2seqError::NonFiniteLoss {
                epoch: self.epoch(),
                loss: losses.loss,
                rec_loss: losses.rec_loss,
                latent_loss: losses.latent_loss,
            });
        }

        self.optimizer.backward_step(&report.cost)?;
        Ok(losses)
    }

    fn check_dataset(&self, dataset: &impl FeatureDataset) -> Result<()> {
        let model_config = self.model.config();
        let (_, timestep, feature) = dataset.x().dim();
        if timestep != model_config.timestep() || feature != model_config.feature() {
            return Err(Seq2seqError::Shape {
                expected: vec![model_config.timestep(), model_config.feature()],
                actual: vec![timestep, feature],
            });
        }
        Ok(())
    }

    fn save(&self, path: &Path, epoch: usize, losses: &EpochLosses) -> Result<()> {
        let metadata = CheckpointMetadata {
            epoch,
            loss: Some(losses.loss),
            rec_loss: Some(losses.rec_loss),
            latent_loss: Some(losses.latent_loss),
            model: Some(self.model.name()),
        };
        self.store.save(path, &self.registry, &metadata)
    }

    /// Train for `nb_epochs`, then restore the best parameters and save them
    /// again under a name carrying `min_loss`
    pub fn fit(&mut self, dataset: &mut impl FeatureDataset) -> Result<TrainingSummary> {
        self.check_dataset(dataset)?;

        let batch_size = self.model.config().batch_size();
        let best_path = self.best_path();

        log::info!("Starting training for {} epochs", self.config.nb_epochs);

        let mut tracker = BestTracker::new(self.config.best_rule);
        let mut last = None;

        for epoch in 1..=self.config.nb_epochs {
            self.phase = TrainingPhase::Training { epoch };

            let batch = dataset.next_batch(batch_size, true)?;
            let losses = self.step(&batch)?;

            if tracker.observe(epoch, &losses) {
                self.save(&best_path, epoch, &losses)?;
            }

            log::info!(
                "Epoch {}, latent_loss {}, rec_loss {}, min_loss {}",
                epoch,
                losses.latent_loss,
                losses.rec_loss,
                tracker.min_loss()
            );
            last = Some(losses);
        }

        let min_loss = tracker.min_loss();
        let (Some((best_epoch, best_losses)), Some(last)) = (tracker.best(), last) else {
            return Err(Seq2seqError::Checkpoint(
                "no epoch produced a best checkpoint".to_string(),
            ));
        };

        log::info!("Min loss {} (epoch {}), restoring {:?}", min_loss, best_epoch, best_path);
        self.store.load(&best_path, &self.registry)?;

        let final_path = self.final_path(min_loss);
        self.save(&final_path, best_epoch, &best_losses)?;
        log::info!("Saved best parameters to {:?}", final_path);

        Ok(TrainingSummary {
            epochs: self.config.nb_epochs,
            min_loss,
            best_epoch,
            last,
            best_path,
            final_path,
        })
    }

    /// Deterministic pass over the whole dataset with the current parameters
    pub fn evaluate(&mut self, dataset: &mut impl FeatureDataset) -> Result<Evaluation> {
        self.phase = TrainingPhase::Evaluating;
        evaluate_dataset(&self.model, dataset)
    }

    /// Full protocol: fit, evaluate, split the reconstruction into
    /// magnitude and phase, export
    pub fn run(
        &mut self,
        dataset: &mut impl FeatureDataset,
        sink: &impl ExportSink,
    ) -> Result<TrainingSummary> {
        let summary = self.fit(dataset)?;
        let evaluation = self.evaluate(dataset)?;

        let (features, phase) = dataset.split_x(&evaluation.reconstruction)?;
        sink.save_export(&self.export_path(), &features, &phase, &evaluation.codes)?;

        self.phase = TrainingPhase::Terminated;
        log::info!("Training complete!");
        Ok(summary)
    }
}

/// Reconstruct and encode every sequence of `dataset`
///
/// Runs in fixed-size batches of the model's batch size, walking the dataset
/// in order. The last batch is padded by wrapping around and the padding rows
/// are dropped from the result.
pub fn evaluate_dataset(
    model: &Seq2seqAutoencoder,
    dataset: &mut impl FeatureDataset,
) -> Result<Evaluation> {
    let batch_size = model.config().batch_size();
    let samples = dataset.len();
    let nb_batches = samples.div_ceil(batch_size);

    dataset.reset();

    let mut reconstructions = Vec::with_capacity(nb_batches);
    let mut codes = Vec::with_capacity(nb_batches);
    for _ in 0..nb_batches {
        let batch = dataset.next_batch(batch_size, false)?;
        let x = array_to_tensor(&batch, model.device())?;

        let output = model.forward(&x, &mut ForwardMode::eval())?;
        reconstructions.push(tensor_to_array3(&output.reconstruction)?);
        codes.push(tensor_to_array2(&output.code)?);
    }

    dataset.reset();

    let views: Vec<_> = reconstructions.iter().map(|a| a.view()).collect();
    let reconstruction = concatenate(Axis(0), &views)?
        .slice(s![..samples, .., ..])
        .to_owned();

    let views: Vec<_> = codes.iter().map(|a| a.view()).collect();
    let codes = concatenate(Axis(0), &views)?.slice(s![..samples, ..]).to_owned();

    Ok(Evaluation {
        reconstruction,
        codes,
    })
}
