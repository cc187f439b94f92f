/// Recurrent encoders: basic (left-to-right) and bidirectional
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{CellConstructor, CellStack, ForwardMode};

/// Encoder output
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Combined final state: [batch, code_dim]
    pub code: Tensor,
    /// Per-timestep `[forward; backward]` states: [batch, timestep, 2 * hidden_dim].
    /// Only the bidirectional encoder produces them.
    pub annotations: Option<Tensor>,
}

/// Sequence encoder
///
/// The basic variant runs one stack over the sequence and keeps the top
/// layer's output at the last timestep. The bidirectional variant adds a
/// second, independent stack over the reversed sequence; the code is the
/// concatenation of both final outputs.
pub struct Encoder {
    forward_stack: CellStack,
    backward_stack: Option<CellStack>,
}

impl Encoder {
    /// Create new Encoder
    ///
    /// # Arguments
    /// * `cell` - Cell constructor
    /// * `feature` - Per-frame input width
    /// * `hidden_dim` - Width of every recurrent layer
    /// * `depth` - Layers per stack
    /// * `bidirectional` - Add the reversed stack
    /// * `vb` - VarBuilder for parameter registration
    pub fn new(
        cell: &dyn CellConstructor,
        feature: usize,
        hidden_dim: usize,
        depth: usize,
        bidirectional: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let forward_stack = CellStack::new(cell, feature, hidden_dim, depth, vb.pp("fw"))?;
        let backward_stack = if bidirectional {
            Some(CellStack::new(cell, feature, hidden_dim, depth, vb.pp("bw"))?)
        } else {
            None
        };

        Ok(Self {
            forward_stack,
            backward_stack,
        })
    }

    pub fn is_bidirectional(&self) -> bool {
        self.backward_stack.is_some()
    }

    /// Width of the code
    pub fn code_dim(&self) -> usize {
        let hidden = self.forward_stack.hidden_dim();
        if self.is_bidirectional() {
            2 * hidden
        } else {
            hidden
        }
    }

    /// Width of one annotation (bidirectional only)
    pub fn annotation_dim(&self) -> usize {
        2 * self.forward_stack.hidden_dim()
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input batch [batch, timestep, feature]
    /// * `mode` - Dropout settings, applied to every timestep's output
    pub fn forward(&self, x: &Tensor, mode: &mut ForwardMode) -> Result<EncoderOutput> {
        let (_, timestep, _) = x.dims3()?;
        if timestep == 0 {
            candle_core::bail!("cannot encode an empty sequence");
        }

        let forward_outputs = run_stack(&self.forward_stack, x, (0..timestep).collect(), mode)?;

        let Some(backward_stack) = &self.backward_stack else {
            let code = forward_outputs[timestep - 1].clone();
            return Ok(EncoderOutput {
                code,
                annotations: None,
            });
        };

        let mut backward_outputs = run_stack(backward_stack, x, (0..timestep).rev().collect(), mode)?;
        // re-align so index t holds the backward state at position t
        backward_outputs.reverse();

        let code = Tensor::cat(&[&forward_outputs[timestep - 1], &backward_outputs[0]], 1)?;

        let annotations = forward_outputs
            .iter()
            .zip(&backward_outputs)
            .map(|(fw, bw)| Tensor::cat(&[fw, bw], 1))
            .collect::<Result<Vec<_>>>()?;
        let annotations = Tensor::stack(&annotations[..], 1)?;

        Ok(EncoderOutput {
            code,
            annotations: Some(annotations),
        })
    }
}

/// Run a stack over the given timestep order, returning outputs in visit order
fn run_stack(
    stack: &CellStack,
    x: &Tensor,
    order: Vec<usize>,
    mode: &mut ForwardMode,
) -> Result<Vec<Tensor>> {
    let batch_size = x.dim(0)?;
    let mut states = stack.zero_state(batch_size, x.dtype(), x.device())?;
    let mut outputs = Vec::with_capacity(order.len());

    for t in order {
        let frame = x.narrow(1, t, 1)?.squeeze(1)?;
        let (output, next) = stack.step(&frame, &states)?;
        states = next;
        outputs.push(mode.dropout(&output)?);
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::CellKind;
    use crate::models::ParamRegistry;
    use candle_core::{DType, Device};

    fn encoder(bidirectional: bool, depth: usize) -> crate::Result<(ParamRegistry, Encoder)> {
        let registry = ParamRegistry::new(DType::F32, &Device::Cpu);
        let encoder = Encoder::new(&CellKind::Gru, 3, 5, depth, bidirectional, registry.var_builder())?;
        registry.initialize(1)?;
        Ok((registry, encoder))
    }

    #[test]
    fn test_code_width_is_timestep_invariant() -> crate::Result<()> {
        for bidirectional in [false, true] {
            let (_registry, encoder) = encoder(bidirectional, 2)?;
            for timestep in [1, 4, 9] {
                let x = Tensor::randn(0f32, 1.0, (2, timestep, 3), &Device::Cpu)?;
                let out = encoder.forward(&x, &mut ForwardMode::eval())?;
                assert_eq!(out.code.dims(), &[2, encoder.code_dim()]);
            }
        }
        Ok(())
    }

    #[test]
    fn test_bidirectional_annotations() -> crate::Result<()> {
        let (_registry, encoder) = encoder(true, 1)?;
        let x = Tensor::randn(0f32, 1.0, (2, 6, 3), &Device::Cpu)?;
        let out = encoder.forward(&x, &mut ForwardMode::eval())?;

        let annotations = out.annotations.expect("bidirectional encoder emits annotations");
        assert_eq!(annotations.dims(), &[2, 6, 10]);

        // the code's forward half is the last annotation's forward half
        let last_fw = annotations.narrow(1, 5, 1)?.squeeze(1)?.narrow(1, 0, 5)?;
        let code_fw = out.code.narrow(1, 0, 5)?;
        assert_eq!(last_fw.to_vec2::<f32>()?, code_fw.to_vec2::<f32>()?);

        // and its backward half is the first annotation's backward half
        let first_bw = annotations.narrow(1, 0, 1)?.squeeze(1)?.narrow(1, 5, 5)?;
        let code_bw = out.code.narrow(1, 5, 5)?;
        assert_eq!(first_bw.to_vec2::<f32>()?, code_bw.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_basic_encoder_has_no_annotations() -> crate::Result<()> {
        let (registry, encoder) = encoder(false, 1)?;
        let x = Tensor::randn(0f32, 1.0, (2, 4, 3), &Device::Cpu)?;
        let out = encoder.forward(&x, &mut ForwardMode::eval())?;

        assert!(out.annotations.is_none());
        assert!(registry.names()?.iter().all(|name| name.starts_with("fw.")));
        Ok(())
    }
}
