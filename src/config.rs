/// Configuration for the sequence-to-sequence autoencoders
///
/// Defaults follow the DSP homework training script: GRU cells on both
/// sides, a 512-wide hidden state, a 2-d latent space and a bidirectional
/// encoder.
use serde::{Deserialize, Serialize};

use crate::layers::cells::CellKind;

/// Which model family to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    /// Encoder + basic decoder, the code is the encoder's final state
    Seq2seq,
    /// Bidirectional encoder + attention decoder
    AttentionSeq2seq,
    /// Encoder + variational bottleneck + basic decoder
    #[default]
    VariationalSeq2seq,
}

impl Architecture {
    pub fn name(&self) -> &'static str {
        match self {
            Architecture::Seq2seq => "Seq2seq",
            Architecture::AttentionSeq2seq => "AttentionSeq2seq",
            Architecture::VariationalSeq2seq => "VariationalSeq2seq",
        }
    }

    pub fn is_variational(&self) -> bool {
        matches!(self, Architecture::VariationalSeq2seq)
    }
}

/// Model options. Any option left out of a config file is false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelOptions {
    /// Decoder reads the code at every timestep (ignored by attention decoding)
    pub peek: bool,
    /// Encoder runs forward and backward stacks and combines their final states
    pub bidirectional: bool,
}

/// Configuration for a sequence-to-sequence autoencoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seq2seqConfig {
    /// (batch_size, timestep, feature), fixed for the lifetime of the model
    pub batch_input_shape: (usize, usize, usize),

    /// (encoder cell, decoder cell)
    pub cells: (CellKind, CellKind),

    /// Width of every recurrent layer
    pub hidden_dim: usize,

    /// Width of the sampled code (variational models only)
    pub latent_dim: usize,

    /// (encoder depth, decoder depth)
    pub depth: (usize, usize),

    /// Model family
    pub architecture: Architecture,

    /// Decoder / encoder switches
    #[serde(default)]
    pub options: ModelOptions,
}

impl Default for Seq2seqConfig {
    fn default() -> Self {
        Self {
            batch_input_shape: (32, 100, 514),
            cells: (CellKind::Gru, CellKind::Gru),
            hidden_dim: 512,
            latent_dim: 2,
            depth: (1, 1),
            architecture: Architecture::VariationalSeq2seq,
            options: ModelOptions {
                peek: false,
                bidirectional: true,
            },
        }
    }
}

impl Seq2seqConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        let (batch_size, timestep, feature) = self.batch_input_shape;
        if batch_size == 0 || timestep == 0 || feature == 0 {
            return Err(crate::Seq2seqError::Config(format!(
                "batch_input_shape must be positive, got {:?}",
                self.batch_input_shape
            )));
        }

        if self.hidden_dim == 0 {
            return Err(crate::Seq2seqError::Config(
                "hidden_dim must be > 0".to_string(),
            ));
        }

        if self.depth.0 == 0 || self.depth.1 == 0 {
            return Err(crate::Seq2seqError::Config(format!(
                "encoder and decoder depth must be > 0, got {:?}",
                self.depth
            )));
        }

        if self.architecture.is_variational() && self.latent_dim == 0 {
            return Err(crate::Seq2seqError::Config(
                "latent_dim must be > 0 for a variational model".to_string(),
            ));
        }

        Ok(())
    }

    pub fn batch_size(&self) -> usize {
        self.batch_input_shape.0
    }

    pub fn timestep(&self) -> usize {
        self.batch_input_shape.1
    }

    pub fn feature(&self) -> usize {
        self.batch_input_shape.2
    }

    /// Attention decoding always reads bidirectional annotations
    pub fn encoder_bidirectional(&self) -> bool {
        self.options.bidirectional || self.architecture == Architecture::AttentionSeq2seq
    }

    /// Width of the encoder's combined final state
    pub fn encoder_dim(&self) -> usize {
        if self.encoder_bidirectional() {
            2 * self.hidden_dim
        } else {
            self.hidden_dim
        }
    }

    /// Width of the code handed to the decoder
    pub fn code_dim(&self) -> usize {
        if self.architecture.is_variational() {
            self.latent_dim
        } else {
            self.encoder_dim()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
}
