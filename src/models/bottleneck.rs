/// Variational bottleneck with the reparameterization trick
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{ForwardMode, Linear};

/// Latent sample plus the statistics the KL term needs
#[derive(Debug, Clone)]
pub struct LatentSample {
    /// Sampled code: [batch, latent_dim]
    pub code: Tensor,
    /// Posterior mean: [batch, latent_dim]
    pub mean: Tensor,
    /// Posterior log-variance: [batch, latent_dim]
    pub log_variance: Tensor,
}

/// Projects the encoder state to a Gaussian posterior and samples from it
pub struct VariationalBottleneck {
    mean_proj: Linear,
    log_var_proj: Linear,
    latent_dim: usize,
}

impl VariationalBottleneck {
    pub fn new(input_dim: usize, latent_dim: usize, vb: VarBuilder) -> Result<Self> {
        let mean_proj = Linear::new(input_dim, latent_dim, true, vb.pp("mean"))?;
        let log_var_proj = Linear::new(input_dim, latent_dim, true, vb.pp("log_var"))?;
        Ok(Self {
            mean_proj,
            log_var_proj,
            latent_dim,
        })
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Forward pass
    ///
    /// Draws fresh epsilon from `mode` on every call. In eval mode there is no
    /// noise and the code is the posterior mean.
    pub fn forward(&self, hidden: &Tensor, mode: &mut ForwardMode) -> Result<LatentSample> {
        let mean = self.mean_proj.forward(hidden)?;
        let log_variance = self.log_var_proj.forward(hidden)?;

        let batch_size = hidden.dim(0)?;
        let code = match mode.standard_normal((batch_size, self.latent_dim), mean.dtype(), mean.device())? {
            Some(eps) => reparameterize(&mean, &log_variance, &eps)?,
            None => mean.clone(),
        };

        Ok(LatentSample {
            code,
            mean,
            log_variance,
        })
    }
}

/// `mean + exp(0.5 * log_variance) * eps`
pub fn reparameterize(mean: &Tensor, log_variance: &Tensor, eps: &Tensor) -> Result<Tensor> {
    let std = log_variance.affine(0.5, 0.0)?.exp()?;
    mean.add(&std.mul(eps)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamRegistry;
    use candle_core::{DType, Device};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zero_noise_gives_mean() -> Result<()> {
        let device = Device::Cpu;
        let mean = Tensor::randn(0f32, 1.0, (4, 3), &device)?;
        let log_variance = Tensor::zeros((4, 3), DType::F32, &device)?;
        let eps = Tensor::zeros((4, 3), DType::F32, &device)?;

        let code = reparameterize(&mean, &log_variance, &eps)?;
        assert_eq!(code.to_vec2::<f32>()?, mean.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_noise_is_scaled_by_std() -> Result<()> {
        let device = Device::Cpu;
        let mean = Tensor::new(&[[1f32, -1.0]], &device)?;
        // log(4) -> std 2
        let log_variance = Tensor::new(&[[4f32.ln(), 0.0]], &device)?;
        let eps = Tensor::new(&[[0.5f32, 3.0]], &device)?;

        let code = reparameterize(&mean, &log_variance, &eps)?.to_vec2::<f32>()?;
        assert!((code[0][0] - 2.0).abs() < 1e-5);
        assert!((code[0][1] - 2.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_forward_shapes_and_eval_mean() -> crate::Result<()> {
        let device = Device::Cpu;
        let registry = ParamRegistry::new(DType::F32, &device);
        let bottleneck = VariationalBottleneck::new(6, 2, registry.var_builder())?;
        registry.initialize(5)?;

        let hidden = Tensor::randn(0f32, 1.0, (3, 6), &device)?;

        let eval = bottleneck.forward(&hidden, &mut ForwardMode::eval())?;
        assert_eq!(eval.code.dims(), &[3, 2]);
        assert_eq!(eval.code.to_vec2::<f32>()?, eval.mean.to_vec2::<f32>()?);

        let mut rng = StdRng::seed_from_u64(9);
        let sampled = bottleneck.forward(&hidden, &mut ForwardMode::train(1.0, &mut rng))?;
        assert_eq!(sampled.log_variance.dims(), &[3, 2]);
        assert_ne!(sampled.code.to_vec2::<f32>()?, sampled.mean.to_vec2::<f32>()?);
        Ok(())
    }
}
