/// Affine projection used by every cell, head and attention scorer
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Linear layer: `y = x W^T + b`
///
/// Parameters are created zero-filled; the owning registry rewrites them
/// with seeded values once the whole model is built. Weights are named
/// `weight`, biases `bias`.
pub struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Create new Linear layer
    ///
    /// # Arguments
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `bias` - Whether to include bias
    /// * `vb` - VarBuilder for parameter registration
    pub fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints((out_features, in_features), "weight", Init::Const(0.0))?;

        let bias = if bias {
            Some(vb.get_with_hints(out_features, "bias", Init::Const(0.0))?)
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Forward pass over `[..., in_features]`
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        // weight is [out_features, in_features], so weight^T is [in_features, out_features]
        let output = input.broadcast_matmul(&self.weight.t()?)?;

        match &self.bias {
            Some(bias) => output.broadcast_add(bias),
            None => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_linear_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let linear = Linear::new(6, 4, true, vb)?;

        let x = Tensor::randn(0f32, 1.0, (2, 6), &device)?;
        assert_eq!(linear.forward(&x)?.dims(), &[2, 4]);

        let x = Tensor::randn(0f32, 1.0, (2, 5, 6), &device)?;
        assert_eq!(linear.forward(&x)?.dims(), &[2, 5, 4]);

        Ok(())
    }

    #[test]
    fn test_linear_registers_named_params() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let _with_bias = Linear::new(3, 2, true, vb.pp("proj"))?;
        let _without_bias = Linear::new(3, 2, false, vb.pp("score"))?;

        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("proj.weight"));
        assert!(data.contains_key("proj.bias"));
        assert!(data.contains_key("score.weight"));
        assert!(!data.contains_key("score.bias"));

        Ok(())
    }
}
