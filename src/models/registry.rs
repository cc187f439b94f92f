/// Explicit parameter registry
///
/// Owns the `VarMap` holding every learnable tensor of a model, keyed by
/// its dotted path (`encoder.fw.layer_0.gates.weight`, ...). The optimizer
/// and the checkpoint store both work from this registry.
use std::collections::{BTreeMap, HashMap};

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::utils::{count_parameters, fans, glorot_bound};
use crate::{Result, Seq2seqError};

pub struct ParamRegistry {
    varmap: VarMap,
    dtype: DType,
    device: Device,
}

impl ParamRegistry {
    pub fn new(dtype: DType, device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            dtype,
            device: device.clone(),
        }
    }

    /// Builder that registers new parameters in this registry
    pub fn var_builder(&self) -> VarBuilder<'_> {
        VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Registered parameters sorted by name
    pub fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Seq2seqError::Model("parameter registry lock poisoned".to_string()))?;

        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.named_vars()?.into_iter().map(|(name, _)| name).collect())
    }

    /// Every parameter, in name order, for the optimizer
    pub fn all_vars(&self) -> Result<Vec<Var>> {
        Ok(self.named_vars()?.into_iter().map(|(_, var)| var).collect())
    }

    /// Total number of scalar parameters
    pub fn num_parameters(&self) -> Result<usize> {
        Ok(self
            .named_vars()?
            .iter()
            .map(|(_, var)| count_parameters(var.as_tensor()))
            .sum())
    }

    /// Seeded initialization
    ///
    /// Parameters whose name ends in `bias` are zeroed; everything else is
    /// drawn from a Glorot uniform distribution. Parameters are visited in
    /// name order so a seed always yields the same model.
    pub fn initialize(&self, seed: u64) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);

        for (name, var) in self.named_vars()? {
            let dims = var.dims().to_vec();
            let numel: usize = dims.iter().product();

            let values = if name.ends_with("bias") {
                vec![0f32; numel]
            } else {
                let (fan_in, fan_out) = fans(&dims);
                let bound = glorot_bound(fan_in, fan_out) as f32;
                let dist = Uniform::new_inclusive(-bound, bound);
                (0..numel).map(|_| dist.sample(&mut rng)).collect()
            };

            let init = Tensor::from_vec(values, dims, &self.device)?.to_dtype(self.dtype)?;
            var.set(&init)?;
        }

        log::debug!("Initialized {} parameters with seed {}", self.num_parameters()?, seed);
        Ok(())
    }

    /// Snapshot of the current values, keyed by name
    pub fn tensors(&self) -> Result<BTreeMap<String, Tensor>> {
        Ok(self
            .named_vars()?
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect())
    }

    /// Overwrite every registered parameter from `tensors`
    ///
    /// Fails if a registered name is missing or its shape differs; extra
    /// entries in `tensors` are ignored.
    pub fn load_tensors(&self, tensors: &HashMap<String, Tensor>) -> Result<()> {
        for (name, var) in self.named_vars()? {
            let source = tensors.get(&name).ok_or_else(|| {
                Seq2seqError::Checkpoint(format!("missing parameter `{}`", name))
            })?;

            if source.dims() != var.dims() {
                return Err(Seq2seqError::Shape {
                    expected: var.dims().to_vec(),
                    actual: source.dims().to_vec(),
                });
            }

            var.set(&source.to_dtype(self.dtype)?.to_device(&self.device)?)?;
        }
        Ok(())
    }
}
