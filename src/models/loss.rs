/// Reconstruction and latent losses
use candle_core::{Result, Tensor};

/// Loss tensors for one forward pass
#[derive(Debug, Clone)]
pub struct LossReport {
    /// Objective the optimizer minimizes
    pub cost: Tensor,
    /// Mean squared reconstruction error
    pub rec_loss: Tensor,
    /// KL divergence to the standard normal prior (zero for plain models)
    pub latent_loss: Tensor,
}

/// Scalar losses reported after a training step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLosses {
    pub loss: f32,
    pub latent_loss: f32,
    pub rec_loss: f32,
}

impl LossReport {
    pub fn to_scalars(&self) -> Result<EpochLosses> {
        Ok(EpochLosses {
            loss: self.cost.to_scalar::<f32>()?,
            latent_loss: self.latent_loss.to_scalar::<f32>()?,
            rec_loss: self.rec_loss.to_scalar::<f32>()?,
        })
    }
}

/// `mean((x_rec - x)^2)` over batch, timestep and feature
pub fn reconstruction_loss(x_rec: &Tensor, x: &Tensor) -> Result<Tensor> {
    x_rec.sub(x)?.sqr()?.mean_all()
}

/// Closed-form KL divergence between `N(mean, exp(log_variance))` and `N(0, 1)`
///
/// `-0.5 * mean_batch(sum_latent(1 + log_variance - mean^2 - exp(log_variance)))`
pub fn latent_loss(mean: &Tensor, log_variance: &Tensor) -> Result<Tensor> {
    let terms = log_variance
        .affine(1.0, 1.0)?
        .sub(&mean.sqr()?)?
        .sub(&log_variance.exp()?)?;
    terms.sum(1)?.mean_all()?.affine(-0.5, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_latent_loss_of_prior_is_zero() -> Result<()> {
        let device = Device::Cpu;
        let zeros = Tensor::zeros((5, 3), DType::F32, &device)?;
        let kl = latent_loss(&zeros, &zeros)?.to_scalar::<f32>()?;
        assert_eq!(kl, 0.0);
        Ok(())
    }

    #[test]
    fn test_latent_loss_known_value() -> Result<()> {
        let device = Device::Cpu;
        // one sample, one dim: mean 1, log_var 0 -> -0.5 * (1 + 0 - 1 - 1) = 0.5
        let mean = Tensor::new(&[[1f32]], &device)?;
        let log_variance = Tensor::new(&[[0f32]], &device)?;
        let kl = latent_loss(&mean, &log_variance)?.to_scalar::<f32>()?;
        assert!((kl - 0.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_latent_loss_sums_latent_dims_and_averages_batch() -> Result<()> {
        let device = Device::Cpu;
        // two samples with two dims at mean 1 -> per-sample 1.0, batch mean 1.0
        let mean = Tensor::ones((2, 2), DType::F32, &device)?;
        let log_variance = Tensor::zeros((2, 2), DType::F32, &device)?;
        let kl = latent_loss(&mean, &log_variance)?.to_scalar::<f32>()?;
        assert!((kl - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_reconstruction_loss() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1.0, (2, 3, 4), &device)?;
        assert_eq!(reconstruction_loss(&x, &x)?.to_scalar::<f32>()?, 0.0);

        let shifted = x.affine(1.0, 2.0)?;
        let mse = reconstruction_loss(&shifted, &x)?.to_scalar::<f32>()?;
        assert!((mse - 4.0).abs() < 1e-5);
        Ok(())
    }
}
