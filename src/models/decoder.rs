/// Decoders: basic (optionally peeking at the code) and attention
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{Attention, CellConstructor, CellStack, CellState, ForwardMode, Linear};

/// Seeds every decoder layer's hidden state from the code
///
/// The code is used as-is when its width matches the hidden width and goes
/// through a learned projection otherwise.
struct StateSeed {
    proj: Option<Linear>,
}

impl StateSeed {
    fn new(code_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let proj = if code_dim != hidden_dim {
            Some(Linear::new(code_dim, hidden_dim, true, vb.pp("init_proj"))?)
        } else {
            None
        };
        Ok(Self { proj })
    }

    fn initial_state(&self, stack: &CellStack, code: &Tensor) -> Result<Vec<CellState>> {
        let h = match &self.proj {
            Some(proj) => proj.forward(code)?,
            None => code.clone(),
        };
        stack.seeded_state(&h)
    }
}

/// Basic decoder
///
/// Each step feeds the previous reconstructed frame (zeros at t = 0) into
/// the stack, plus the code when `peek` is set, and projects the top output
/// to a frame.
pub struct BasicDecoder {
    stack: CellStack,
    seed: StateSeed,
    out_proj: Linear,
    peek: bool,
    timestep: usize,
    feature: usize,
}

impl BasicDecoder {
    /// Create new BasicDecoder
    ///
    /// # Arguments
    /// * `cell` - Cell constructor
    /// * `code_dim` - Width of the code
    /// * `feature` - Width of a reconstructed frame
    /// * `timestep` - Number of frames to produce
    /// * `hidden_dim` - Width of every recurrent layer
    /// * `depth` - Number of layers
    /// * `peek` - Concatenate the code to every step's input
    /// * `vb` - VarBuilder for parameter registration
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cell: &dyn CellConstructor,
        code_dim: usize,
        feature: usize,
        timestep: usize,
        hidden_dim: usize,
        depth: usize,
        peek: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let input_dim = if peek { feature + code_dim } else { feature };
        let stack = CellStack::new(cell, input_dim, hidden_dim, depth, vb.pp("cell"))?;
        let seed = StateSeed::new(code_dim, hidden_dim, vb.clone())?;
        let out_proj = Linear::new(hidden_dim, feature, true, vb.pp("out_proj"))?;

        Ok(Self {
            stack,
            seed,
            out_proj,
            peek,
            timestep,
            feature,
        })
    }

    pub fn peek(&self) -> bool {
        self.peek
    }

    /// Decoder state right after seeding from the code
    pub fn initial_state(&self, code: &Tensor) -> Result<Vec<CellState>> {
        self.seed.initial_state(&self.stack, code)
    }

    /// One decoding step
    ///
    /// # Arguments
    /// * `prev` - Previous frame [batch, feature]
    /// * `code` - Code [batch, code_dim], read only when peeking
    /// * `states` - Per-layer states
    ///
    /// # Returns
    /// Tuple of (frame [batch, feature], new states)
    pub fn step(
        &self,
        prev: &Tensor,
        code: &Tensor,
        states: &[CellState],
        mode: &mut ForwardMode,
    ) -> Result<(Tensor, Vec<CellState>)> {
        let input = if self.peek {
            Tensor::cat(&[prev, code], 1)?
        } else {
            prev.clone()
        };

        let (output, states) = self.stack.step(&input, states)?;
        let output = mode.dropout(&output)?;
        let frame = self.out_proj.forward(&output)?;
        Ok((frame, states))
    }

    /// Decode a code into [batch, timestep, feature]
    pub fn forward(&self, code: &Tensor, mode: &mut ForwardMode) -> Result<Tensor> {
        let batch_size = code.dim(0)?;
        let mut states = self.initial_state(code)?;
        let mut prev = Tensor::zeros((batch_size, self.feature), code.dtype(), code.device())?;

        let mut frames = Vec::with_capacity(self.timestep);
        for _ in 0..self.timestep {
            let (frame, next) = self.step(&prev, code, &states, mode)?;
            states = next;
            prev = frame.clone();
            frames.push(frame);
        }

        Tensor::stack(&frames[..], 1)
    }
}

/// Attention decoder
///
/// Each step attends over the encoder annotations with the top layer's
/// current state and feeds `[context; previous frame]` into the stack. The
/// first step's "previous frame" is the code projected to frame width.
pub struct AttentionDecoder {
    stack: CellStack,
    seed: StateSeed,
    attention: Attention,
    code_to_frame: Linear,
    out_proj: Linear,
    timestep: usize,
}

impl AttentionDecoder {
    /// Create new AttentionDecoder
    ///
    /// # Arguments
    /// * `cell` - Cell constructor
    /// * `code_dim` - Width of the code
    /// * `annotation_dim` - Width of each encoder annotation
    /// * `feature` - Width of a reconstructed frame
    /// * `timestep` - Number of frames to produce
    /// * `hidden_dim` - Width of every recurrent layer (and of the scoring space)
    /// * `depth` - Number of layers
    /// * `vb` - VarBuilder for parameter registration
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cell: &dyn CellConstructor,
        code_dim: usize,
        annotation_dim: usize,
        feature: usize,
        timestep: usize,
        hidden_dim: usize,
        depth: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let stack = CellStack::new(cell, annotation_dim + feature, hidden_dim, depth, vb.pp("cell"))?;
        let seed = StateSeed::new(code_dim, hidden_dim, vb.clone())?;
        let attention = Attention::new(hidden_dim, annotation_dim, hidden_dim, vb.pp("attention"))?;
        let code_to_frame = Linear::new(code_dim, feature, true, vb.pp("code_to_frame"))?;
        let out_proj = Linear::new(hidden_dim, feature, true, vb.pp("out_proj"))?;

        Ok(Self {
            stack,
            seed,
            attention,
            code_to_frame,
            out_proj,
            timestep,
        })
    }

    /// Decode with attention
    ///
    /// # Returns
    /// Tuple of (reconstruction [batch, timestep, feature],
    /// attention weights [batch, timestep, annotation positions])
    pub fn forward_with_weights(
        &self,
        code: &Tensor,
        annotations: &Tensor,
        mode: &mut ForwardMode,
    ) -> Result<(Tensor, Tensor)> {
        let keys = self.attention.keys(annotations)?;
        let mut states = self.seed.initial_state(&self.stack, code)?;
        let mut prev = self.code_to_frame.forward(code)?;

        let mut frames = Vec::with_capacity(self.timestep);
        let mut all_weights = Vec::with_capacity(self.timestep);
        for _ in 0..self.timestep {
            let query = match states.last() {
                Some(top) => top.h.clone(),
                None => candle_core::bail!("attention decoder has no layers"),
            };
            // weights depend on the current state, so they are recomputed every step
            let (context, weights) = self.attention.context(&query, &keys, annotations)?;

            let input = Tensor::cat(&[&context, &prev], 1)?;
            let (output, next) = self.stack.step(&input, &states)?;
            states = next;

            let output = mode.dropout(&output)?;
            let frame = self.out_proj.forward(&output)?;
            prev = frame.clone();
            frames.push(frame);
            all_weights.push(weights);
        }

        Ok((Tensor::stack(&frames[..], 1)?, Tensor::stack(&all_weights[..], 1)?))
    }

    pub fn forward(&self, code: &Tensor, annotations: &Tensor, mode: &mut ForwardMode) -> Result<Tensor> {
        Ok(self.forward_with_weights(code, annotations, mode)?.0)
    }
}

/// Either decoder
pub enum Decoder {
    /// Feeds back its previous frame, optionally peeking at the code
    Basic(BasicDecoder),
    /// Attends over the bidirectional encoder annotations at every step
    Attention(AttentionDecoder),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::CellKind;
    use crate::models::ParamRegistry;
    use candle_core::{DType, Device};

    fn basic_decoder(peek: bool) -> crate::Result<(ParamRegistry, BasicDecoder)> {
        let registry = ParamRegistry::new(DType::F32, &Device::Cpu);
        let decoder = BasicDecoder::new(&CellKind::Gru, 3, 4, 5, 6, 2, peek, registry.var_builder())?;
        registry.initialize(17)?;
        Ok((registry, decoder))
    }

    #[test]
    fn test_basic_decoder_shape() -> crate::Result<()> {
        for peek in [false, true] {
            let (_registry, decoder) = basic_decoder(peek)?;
            let code = Tensor::randn(0f32, 1.0, (2, 3), &Device::Cpu)?;
            let out = decoder.forward(&code, &mut ForwardMode::eval())?;
            assert_eq!(out.dims(), &[2, 5, 4]);
        }
        Ok(())
    }

    #[test]
    fn test_step_ignores_code_without_peek() -> crate::Result<()> {
        let device = Device::Cpu;
        let (_registry, decoder) = basic_decoder(false)?;

        let code = Tensor::randn(0f32, 1.0, (2, 3), &device)?;
        let perturbed = code.affine(1.0, 0.5)?;
        let states = decoder.initial_state(&code)?;
        let prev = Tensor::randn(0f32, 1.0, (2, 4), &device)?;

        let (a, _) = decoder.step(&prev, &code, &states, &mut ForwardMode::eval())?;
        let (b, _) = decoder.step(&prev, &perturbed, &states, &mut ForwardMode::eval())?;
        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_peek_makes_every_step_depend_on_code() -> crate::Result<()> {
        let device = Device::Cpu;
        let (_registry, decoder) = basic_decoder(true)?;

        let code = Tensor::randn(0f32, 1.0, (2, 3), &device)?;
        let perturbed = code.affine(1.0, 0.5)?;
        let states = decoder.initial_state(&code)?;
        let prev = Tensor::randn(0f32, 1.0, (2, 4), &device)?;

        // same state and previous frame, only the peeked code differs
        let (a, _) = decoder.step(&prev, &code, &states, &mut ForwardMode::eval())?;
        let (b, _) = decoder.step(&prev, &perturbed, &states, &mut ForwardMode::eval())?;
        assert_ne!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);

        // and over a full decode every frame moves
        let full_a = decoder.forward(&code, &mut ForwardMode::eval())?;
        let full_b = decoder.forward(&perturbed, &mut ForwardMode::eval())?;
        for t in 0..5 {
            let fa = full_a.narrow(1, t, 1)?.flatten_all()?.to_vec1::<f32>()?;
            let fb = full_b.narrow(1, t, 1)?.flatten_all()?.to_vec1::<f32>()?;
            assert_ne!(fa, fb, "frame {} unchanged", t);
        }
        Ok(())
    }

    #[test]
    fn test_attention_decoder_shapes() -> crate::Result<()> {
        let device = Device::Cpu;
        let registry = ParamRegistry::new(DType::F32, &device);
        let decoder = AttentionDecoder::new(&CellKind::BasicLstm, 8, 8, 4, 5, 4, 1, registry.var_builder())?;
        registry.initialize(3)?;

        let code = Tensor::randn(0f32, 1.0, (2, 8), &device)?;
        let annotations = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?;
        let (out, weights) = decoder.forward_with_weights(&code, &annotations, &mut ForwardMode::eval())?;

        assert_eq!(out.dims(), &[2, 5, 4]);
        assert_eq!(weights.dims(), &[2, 5, 5]);

        let totals = weights.sum(2)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(totals.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }
}
