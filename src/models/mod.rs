/// Sequence-to-sequence autoencoders
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;

use crate::config::{Architecture, Seq2seqConfig};
use crate::layers::{get_cell, ForwardMode};
use crate::{Result, Seq2seqError};

pub mod bottleneck;
pub mod decoder;
pub mod encoder;
pub mod loader;
pub mod loss;
pub mod registry;

pub use bottleneck::{LatentSample, VariationalBottleneck};
pub use decoder::{AttentionDecoder, BasicDecoder, Decoder};
pub use encoder::{Encoder, EncoderOutput};
pub use loss::{EpochLosses, LossReport};
pub use registry::ParamRegistry;

/// Result of one forward pass
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// Reconstruction: [batch, timestep, feature]
    pub reconstruction: Tensor,
    /// Code handed to the decoder: [batch, code_dim]
    pub code: Tensor,
    /// Posterior mean (variational models only)
    pub mean: Option<Tensor>,
    /// Posterior log-variance (variational models only)
    pub log_variance: Option<Tensor>,
}

/// Sequence-to-sequence autoencoder
///
/// One type covers the three model families; `config.architecture` picks
/// the decoder and whether the variational bottleneck sits between encoder
/// and decoder:
/// - `Seq2seq`: encoder -> basic decoder
/// - `AttentionSeq2seq`: bidirectional encoder -> attention decoder
/// - `VariationalSeq2seq`: encoder -> bottleneck -> basic decoder
pub struct Seq2seqAutoencoder {
    config: Seq2seqConfig,
    encoder: Encoder,
    bottleneck: Option<VariationalBottleneck>,
    decoder: Decoder,
    device: Device,
}

impl Seq2seqAutoencoder {
    /// Create new autoencoder, registering its parameters through `vb`
    pub fn new(config: Seq2seqConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let device = vb.device().clone();
        let (_, timestep, feature) = config.batch_input_shape;
        let (en_depth, de_depth) = config.depth;
        let hidden_dim = config.hidden_dim;

        if config.architecture == Architecture::AttentionSeq2seq {
            if !config.options.bidirectional {
                log::warn!("Attention decoding reads bidirectional annotations; using a bidirectional encoder");
            }
            if config.options.peek {
                log::warn!("`peek` has no effect with attention decoding");
            }
        }

        let en_cell = get_cell(&config.cells.0);
        let de_cell = get_cell(&config.cells.1);

        let encoder = Encoder::new(
            en_cell.as_ref(),
            feature,
            hidden_dim,
            en_depth,
            config.encoder_bidirectional(),
            vb.pp("encoder"),
        )?;

        let bottleneck = if config.architecture.is_variational() {
            Some(VariationalBottleneck::new(
                encoder.code_dim(),
                config.latent_dim,
                vb.pp("bottleneck"),
            )?)
        } else {
            None
        };

        let code_dim = config.code_dim();

        let decoder = match config.architecture {
            Architecture::AttentionSeq2seq => Decoder::Attention(AttentionDecoder::new(
                de_cell.as_ref(),
                code_dim,
                encoder.annotation_dim(),
                feature,
                timestep,
                hidden_dim,
                de_depth,
                vb.pp("decoder"),
            )?),
            Architecture::Seq2seq | Architecture::VariationalSeq2seq => {
                Decoder::Basic(BasicDecoder::new(
                    de_cell.as_ref(),
                    code_dim,
                    feature,
                    timestep,
                    hidden_dim,
                    de_depth,
                    config.options.peek,
                    vb.pp("decoder"),
                )?)
            }
        };

        log::debug!("Built {}", Self::describe(&config));

        Ok(Self {
            config,
            encoder,
            bottleneck,
            decoder,
            device,
        })
    }

    fn describe(config: &Seq2seqConfig) -> String {
        let mut name = format!(
            "{}_{}-{}_h{}",
            config.architecture.name(),
            config.cells.0.name(),
            config.cells.1.name(),
            config.hidden_dim
        );
        if config.architecture.is_variational() {
            name.push_str(&format!("_z{}", config.latent_dim));
        }
        name.push_str(&format!("_d{}x{}", config.depth.0, config.depth.1));
        if config.encoder_bidirectional() {
            name.push_str("_bi");
        }
        if config.options.peek && config.architecture != Architecture::AttentionSeq2seq {
            name.push_str("_peek");
        }
        name
    }

    /// Descriptive name, used for result file names
    pub fn name(&self) -> String {
        Self::describe(&self.config)
    }

    pub fn config(&self) -> &Seq2seqConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Fail unless `x` has exactly the configured batch shape
    pub fn check_batch(&self, x: &Tensor) -> Result<()> {
        let (b, t, f) = self.config.batch_input_shape;
        if x.dims() != [b, t, f] {
            return Err(Seq2seqError::Shape {
                expected: vec![b, t, f],
                actual: x.dims().to_vec(),
            });
        }
        Ok(())
    }

    /// Forward pass: encode, (sample), decode
    pub fn forward(&self, x: &Tensor, mode: &mut ForwardMode) -> Result<ForwardOutput> {
        self.check_batch(x)?;

        let encoded = self.encoder.forward(x, mode)?;

        let (code, mean, log_variance) = match &self.bottleneck {
            Some(bottleneck) => {
                let sample = bottleneck.forward(&encoded.code, mode)?;
                (sample.code, Some(sample.mean), Some(sample.log_variance))
            }
            None => (encoded.code, None, None),
        };

        let reconstruction = match &self.decoder {
            Decoder::Basic(decoder) => decoder.forward(&code, mode)?,
            Decoder::Attention(decoder) => {
                let annotations = encoded.annotations.as_ref().ok_or_else(|| {
                    Seq2seqError::Model("attention decoder needs encoder annotations".to_string())
                })?;
                decoder.forward(&code, annotations, mode)?
            }
        };

        Ok(ForwardOutput {
            reconstruction,
            code,
            mean,
            log_variance,
        })
    }

    /// Losses for a forward pass over `x`
    pub fn compute_loss(&self, x: &Tensor, output: &ForwardOutput) -> Result<LossReport> {
        let rec_loss = loss::reconstruction_loss(&output.reconstruction, x)?;

        let report = match (&output.mean, &output.log_variance) {
            (Some(mean), Some(log_variance)) => {
                let latent_loss = loss::latent_loss(mean, log_variance)?;
                let cost = rec_loss.add(&latent_loss)?;
                LossReport {
                    cost,
                    rec_loss,
                    latent_loss,
                }
            }
            _ => LossReport {
                cost: rec_loss.clone(),
                latent_loss: rec_loss.zeros_like()?,
                rec_loss,
            },
        };

        Ok(report)
    }

    /// Deterministic reconstruction (no dropout, posterior mean as code)
    pub fn reconstruct(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.forward(x, &mut ForwardMode::eval())?.reconstruction)
    }

    /// Deterministic code for `x`
    pub fn encode(&self, x: &Tensor) -> Result<Tensor> {
        self.check_batch(x)?;
        let mut mode = ForwardMode::eval();
        let encoded = self.encoder.forward(x, &mut mode)?;
        match &self.bottleneck {
            Some(bottleneck) => Ok(bottleneck.forward(&encoded.code, &mut mode)?.code),
            None => Ok(encoded.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelOptions;
    use crate::layers::CellKind;
    use candle_core::DType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config(architecture: Architecture, options: ModelOptions) -> Seq2seqConfig {
        Seq2seqConfig {
            batch_input_shape: (2, 4, 6),
            cells: (CellKind::Gru, CellKind::BasicLstm),
            hidden_dim: 5,
            latent_dim: 2,
            depth: (1, 2),
            architecture,
            options,
        }
    }

    fn build(config: Seq2seqConfig) -> Result<(ParamRegistry, Seq2seqAutoencoder)> {
        let registry = ParamRegistry::new(DType::F32, &Device::Cpu);
        let model = Seq2seqAutoencoder::new(config, registry.var_builder())?;
        registry.initialize(0)?;
        Ok((registry, model))
    }

    #[test]
    fn test_every_architecture_reconstructs_batch_shape() -> Result<()> {
        let options = [
            ModelOptions { peek: false, bidirectional: false },
            ModelOptions { peek: true, bidirectional: true },
        ];
        for architecture in [
            Architecture::Seq2seq,
            Architecture::AttentionSeq2seq,
            Architecture::VariationalSeq2seq,
        ] {
            for opts in options {
                let config = small_config(architecture, opts);
                let code_dim = config.code_dim();
                let (_registry, model) = build(config)?;

                let x = Tensor::randn(0f32, 1.0, (2, 4, 6), &Device::Cpu)?;
                let mut rng = StdRng::seed_from_u64(1);
                let out = model.forward(&x, &mut ForwardMode::train(0.8, &mut rng))?;

                assert_eq!(out.reconstruction.dims(), &[2, 4, 6]);
                assert_eq!(out.code.dims(), &[2, code_dim]);
                assert_eq!(out.mean.is_some(), architecture.is_variational());
            }
        }
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_fails_fast() -> Result<()> {
        let (_registry, model) = build(small_config(Architecture::Seq2seq, ModelOptions::default()))?;
        let x = Tensor::randn(0f32, 1.0, (3, 4, 6), &Device::Cpu)?;

        match model.forward(&x, &mut ForwardMode::eval()) {
            Err(Seq2seqError::Shape { expected, actual }) => {
                assert_eq!(expected, vec![2, 4, 6]);
                assert_eq!(actual, vec![3, 4, 6]);
            }
            other => panic!("expected shape error, got {:?}", other.map(|_| ())),
        }
        Ok(())
    }

    #[test]
    fn test_losses() -> Result<()> {
        let x = Tensor::randn(0f32, 1.0, (2, 4, 6), &Device::Cpu)?;

        let (_r, plain) = build(small_config(Architecture::Seq2seq, ModelOptions::default()))?;
        let out = plain.forward(&x, &mut ForwardMode::eval())?;
        let losses = plain.compute_loss(&x, &out)?.to_scalars()?;
        assert_eq!(losses.latent_loss, 0.0);
        assert_eq!(losses.loss, losses.rec_loss);

        let (_r, vae) = build(small_config(Architecture::VariationalSeq2seq, ModelOptions::default()))?;
        let out = vae.forward(&x, &mut ForwardMode::eval())?;
        let losses = vae.compute_loss(&x, &out)?.to_scalars()?;
        assert!((losses.loss - (losses.rec_loss + losses.latent_loss)).abs() < 1e-5);
        assert!(losses.latent_loss >= 0.0);
        Ok(())
    }

    #[test]
    fn test_eval_is_deterministic() -> Result<()> {
        let (_registry, model) = build(small_config(
            Architecture::VariationalSeq2seq,
            ModelOptions { peek: true, bidirectional: true },
        ))?;
        let x = Tensor::randn(0f32, 1.0, (2, 4, 6), &Device::Cpu)?;

        let a = model.reconstruct(&x)?.flatten_all()?.to_vec1::<f32>()?;
        let b = model.reconstruct(&x)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(a, b);

        let code = model.encode(&x)?;
        let out = model.forward(&x, &mut ForwardMode::eval())?;
        assert_eq!(code.to_vec2::<f32>()?, out.mean.unwrap().to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_model_names() -> Result<()> {
        let (_r, model) = build(small_config(
            Architecture::VariationalSeq2seq,
            ModelOptions { peek: true, bidirectional: true },
        ))?;
        assert_eq!(model.name(), "VariationalSeq2seq_GRU-BasicLSTM_h5_z2_d1x2_bi_peek");

        let (_r, model) = build(small_config(Architecture::AttentionSeq2seq, ModelOptions::default()))?;
        assert_eq!(model.name(), "AttentionSeq2seq_GRU-BasicLSTM_h5_d1x2_bi");
        Ok(())
    }

    #[test]
    fn test_parameter_names_are_scoped() -> Result<()> {
        let (registry, _model) = build(small_config(
            Architecture::VariationalSeq2seq,
            ModelOptions { peek: false, bidirectional: true },
        ))?;
        let names = registry.names()?;

        assert!(names.iter().any(|n| n.starts_with("encoder.fw.")));
        assert!(names.iter().any(|n| n.starts_with("encoder.bw.")));
        assert!(names.contains(&"bottleneck.mean.weight".to_string()));
        assert!(names.contains(&"bottleneck.log_var.weight".to_string()));
        assert!(names.contains(&"decoder.init_proj.weight".to_string()));
        Ok(())
    }
}
