//! Seeded dropout and the per-pass noise context
//!
//! Every random draw of a forward pass (dropout masks, bottleneck noise)
//! comes from the caller's `StdRng`, so a seed pins down a training run.

use candle_core::{DType, Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// Noise settings for one forward pass
///
/// Training passes carry a keep probability and an RNG. Evaluation passes
/// carry neither: dropout is the identity and the variational bottleneck
/// returns its mean.
pub struct ForwardMode<'a> {
    keep_prob: f64,
    rng: Option<&'a mut StdRng>,
}

impl<'a> ForwardMode<'a> {
    /// Stochastic pass with the given keep probability
    pub fn train(keep_prob: f64, rng: &'a mut StdRng) -> Self {
        Self {
            keep_prob,
            rng: Some(rng),
        }
    }

    /// Deterministic pass: keep_prob = 1.0, no latent sampling
    pub fn eval() -> Self {
        Self {
            keep_prob: 1.0,
            rng: None,
        }
    }

    pub fn keep_prob(&self) -> f64 {
        self.keep_prob
    }

    pub fn is_stochastic(&self) -> bool {
        self.rng.is_some()
    }

    /// Apply dropout with this pass's keep probability
    pub fn dropout(&mut self, x: &Tensor) -> Result<Tensor> {
        let keep_prob = self.keep_prob;
        match self.rng.as_deref_mut() {
            Some(rng) if keep_prob < 1.0 => dropout(x, keep_prob, rng),
            _ => Ok(x.clone()),
        }
    }

    /// Standard normal sample of the given shape, or `None` in eval mode
    pub fn standard_normal(
        &mut self,
        shape: (usize, usize),
        dtype: DType,
        device: &Device,
    ) -> Result<Option<Tensor>> {
        let Some(rng) = self.rng.as_deref_mut() else {
            return Ok(None);
        };

        let values: Vec<f32> = (0..shape.0 * shape.1)
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        let eps = Tensor::from_vec(values, shape, device)?.to_dtype(dtype)?;
        Ok(Some(eps))
    }
}

/// Inverted dropout: keeps each element with probability `keep_prob` and
/// scales survivors by `1 / keep_prob`.
pub fn dropout(x: &Tensor, keep_prob: f64, rng: &mut impl Rng) -> Result<Tensor> {
    if !(keep_prob > 0.0 && keep_prob <= 1.0) {
        candle_core::bail!("keep_prob must be in (0, 1], got {}", keep_prob);
    }
    if keep_prob == 1.0 {
        return Ok(x.clone());
    }

    let scale = (1.0 / keep_prob) as f32;
    let mask: Vec<f32> = (0..x.elem_count())
        .map(|_| if rng.gen::<f64>() < keep_prob { scale } else { 0.0 })
        .collect();
    let mask = Tensor::from_vec(mask, x.dims().to_vec(), x.device())?.to_dtype(x.dtype())?;
    x.mul(&mask)
}
