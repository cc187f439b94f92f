//! speech2vec - variational sequence-to-sequence autoencoder for speech
//!
//! Learns fixed-size codes for speech feature sequences (magnitude + phase
//! frames) with a recurrent encoder/decoder pair, an optional attention
//! decoder and a variational latent bottleneck.
//!
//! # Architecture
//!
//! - **Encoder**: stacked recurrent cells, unidirectional or bidirectional
//! - **Bottleneck**: mean / log-variance heads with reparameterized sampling
//! - **Decoder**: basic (optionally peeking at the code) or attention-based
//!
//! # Example
//!
//! ```ignore
//! use speech2vec::{Seq2seqConfig, training::{Trainer, TrainingConfig}};
//!
//! let mut trainer = Trainer::new(Seq2seqConfig::default(), TrainingConfig::default(), device)?;
//! let summary = trainer.run(&mut dataset, &NpzExport)?;
//! ```

pub mod config;
pub mod data;
pub mod export;
pub mod layers;
pub mod models;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::{Architecture, ModelOptions, Seq2seqConfig};
pub use layers::cells::CellKind;
pub use models::{ParamRegistry, Seq2seqAutoencoder};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum Seq2seqError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Unknown recurrent cell kind: {0}")]
    UnknownCell(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    Shape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Non-finite loss at epoch {epoch}: loss={loss}, rec_loss={rec_loss}, latent_loss={latent_loss}")]
    NonFiniteLoss {
        epoch: usize,
        loss: f32,
        rec_loss: f32,
        latent_loss: f32,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("Array shape error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("NPY read error: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("NPY write error: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("NPZ read error: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),

    #[error("NPZ write error: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),
}

pub type Result<T> = std::result::Result<T, Seq2seqError>;
