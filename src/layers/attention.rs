/// Additive (Bahdanau-style) attention over encoder annotations
use candle_core::{Result, Tensor, D};
use candle_nn::VarBuilder;

use super::linear::Linear;

/// Additive attention
///
/// `score(s, h_j) = v^T tanh(W_q s + W_k h_j + b)`, normalized with a
/// softmax over annotation positions.
pub struct Attention {
    query_proj: Linear,
    key_proj: Linear,
    score: Linear,
    attention_dim: usize,
}

impl Attention {
    /// Create new Attention layer
    ///
    /// # Arguments
    /// * `query_dim` - Width of the decoder state doing the lookup
    /// * `annotation_dim` - Width of each encoder annotation
    /// * `attention_dim` - Width of the shared scoring space
    /// * `vb` - VarBuilder for parameter registration
    pub fn new(
        query_dim: usize,
        annotation_dim: usize,
        attention_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let query_proj = Linear::new(query_dim, attention_dim, false, vb.pp("query_proj"))?;
        let key_proj = Linear::new(annotation_dim, attention_dim, true, vb.pp("key_proj"))?;
        let score = Linear::new(attention_dim, 1, false, vb.pp("score"))?;

        Ok(Self {
            query_proj,
            key_proj,
            score,
            attention_dim,
        })
    }

    pub fn attention_dim(&self) -> usize {
        self.attention_dim
    }

    /// Project annotations [batch, timestep, annotation_dim] into the
    /// scoring space. Depends only on the encoder, so it runs once per pass.
    pub fn keys(&self, annotations: &Tensor) -> Result<Tensor> {
        self.key_proj.forward(annotations)
    }

    /// Attention distribution for one decoder state
    ///
    /// # Arguments
    /// * `query` - Decoder state [batch, query_dim]
    /// * `keys` - Output of [`Attention::keys`] [batch, timestep, attention_dim]
    ///
    /// # Returns
    /// Weights [batch, timestep], each row summing to 1
    pub fn weights(&self, query: &Tensor, keys: &Tensor) -> Result<Tensor> {
        let query = self.query_proj.forward(query)?.unsqueeze(1)?;
        let energy = keys.broadcast_add(&query)?.tanh()?;
        let scores = self.score.forward(&energy)?.squeeze(2)?;
        candle_nn::ops::softmax(&scores, D::Minus1)
    }

    /// Weighted sum of annotations
    ///
    /// # Returns
    /// Tuple of (context [batch, annotation_dim], weights [batch, timestep])
    pub fn context(
        &self,
        query: &Tensor,
        keys: &Tensor,
        annotations: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let weights = self.weights(query, keys)?;
        let context = weights.unsqueeze(2)?.broadcast_mul(annotations)?.sum(1)?;
        Ok((context, weights))
    }
}
