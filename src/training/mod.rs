/// Training infrastructure for the autoencoders
pub mod checkpoint;
pub mod trainer;

pub use checkpoint::{read_metadata, CheckpointMetadata, CheckpointStore, SafetensorsStore};
pub use trainer::{
    evaluate_dataset, BestLossRule, BestTracker, Evaluation, Trainer, TrainingConfig, TrainingPhase,
    TrainingSummary,
};
