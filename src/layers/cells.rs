/// Recurrent cells and the cell factory
///
/// Cell equations follow the classic TensorFlow `rnn_cell` family so
/// `BasicRNN`, `BasicLSTM`, `GRU` and `LSTM` keep their usual meaning. `LSTM`
/// uses the default `LSTMCell` settings (no peepholes), so it computes the same
/// function as `BasicLSTM`; peepholes are opt-in through `PeepholeLSTM`.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Init, VarBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::linear::Linear;

/// Added to the forget gate pre-activation of both LSTM variants
const FORGET_BIAS: f64 = 1.0;

/// Recurrent state of one cell: hidden output plus LSTM memory
#[derive(Debug, Clone)]
pub struct CellState {
    /// Hidden state / output: [batch, hidden_dim]
    pub h: Tensor,
    /// Memory cell, only present for LSTM variants: [batch, hidden_dim]
    pub c: Option<Tensor>,
}

impl CellState {
    /// All-zero state
    pub fn zeros(
        batch_size: usize,
        hidden_dim: usize,
        with_cell: bool,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let h = Tensor::zeros((batch_size, hidden_dim), dtype, device)?;
        let c = if with_cell { Some(h.zeros_like()?) } else { None };
        Ok(Self { h, c })
    }

    /// State seeded with a given hidden vector; LSTM memory starts at zero
    pub fn from_hidden(h: Tensor, with_cell: bool) -> Result<Self> {
        let c = if with_cell { Some(h.zeros_like()?) } else { None };
        Ok(Self { h, c })
    }

    fn memory(&self) -> Result<&Tensor> {
        self.c
            .as_ref()
            .ok_or_else(|| candle_core::Error::Msg("LSTM state is missing its memory cell".into()))
    }
}

/// One recurrent unit, advanced one timestep at a time
pub trait RecurrentCell: Send + Sync {
    /// Width of the hidden state
    fn hidden_dim(&self) -> usize;

    /// Whether the state carries an LSTM memory cell
    fn has_cell_state(&self) -> bool {
        false
    }

    /// Advance one step. `input` is [batch, input_dim].
    fn step(&self, input: &Tensor, state: &CellState) -> Result<CellState>;
}

/// Builds recurrent units of a fixed kind
///
/// This is the "pre-built unit" hook: anything implementing it can be put in
/// [`CellKind::Custom`] and will be handed back unchanged by [`get_cell`].
pub trait CellConstructor: Send + Sync {
    /// Short name used in model names and serialized configs
    fn name(&self) -> &str;

    fn build(
        &self,
        input_dim: usize,
        hidden_dim: usize,
        vb: VarBuilder,
    ) -> Result<Box<dyn RecurrentCell>>;
}

/// Recurrent cell kind
#[derive(Clone)]
pub enum CellKind {
    BasicRnn,
    BasicLstm,
    Gru,
    Lstm,
    /// LSTM with diagonal peephole connections
    PeepholeLstm,
    Custom(Arc<dyn CellConstructor>),
}

impl CellKind {
    pub fn name(&self) -> &str {
        match self {
            CellKind::BasicRnn => "BasicRNN",
            CellKind::BasicLstm => "BasicLSTM",
            CellKind::Gru => "GRU",
            CellKind::Lstm => "LSTM",
            CellKind::PeepholeLstm => "PeepholeLSTM",
            CellKind::Custom(constructor) => constructor.name(),
        }
    }
}

impl fmt::Debug for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellKind::Custom(constructor) => write!(f, "Custom({})", constructor.name()),
            other => f.write_str(other.name()),
        }
    }
}

impl PartialEq for CellKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CellKind::Custom(a), CellKind::Custom(b)) => Arc::ptr_eq(a, b),
            (CellKind::BasicRnn, CellKind::BasicRnn)
            | (CellKind::BasicLstm, CellKind::BasicLstm)
            | (CellKind::Gru, CellKind::Gru)
            | (CellKind::Lstm, CellKind::Lstm)
            | (CellKind::PeepholeLstm, CellKind::PeepholeLstm) => true,
            _ => false,
        }
    }
}

impl FromStr for CellKind {
    type Err = crate::Seq2seqError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BasicRNN" | "BasicRNNCell" => Ok(CellKind::BasicRnn),
            "BasicLSTM" | "BasicLSTMCell" => Ok(CellKind::BasicLstm),
            "GRU" | "GRUCell" => Ok(CellKind::Gru),
            "LSTM" | "LSTMCell" => Ok(CellKind::Lstm),
            "PeepholeLSTM" | "PeepholeLSTMCell" => Ok(CellKind::PeepholeLstm),
            other => Err(crate::Seq2seqError::UnknownCell(other.to_string())),
        }
    }
}

impl Serialize for CellKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CellKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

impl CellConstructor for CellKind {
    fn name(&self) -> &str {
        CellKind::name(self)
    }

    fn build(
        &self,
        input_dim: usize,
        hidden_dim: usize,
        vb: VarBuilder,
    ) -> Result<Box<dyn RecurrentCell>> {
        let cell: Box<dyn RecurrentCell> = match self {
            CellKind::BasicRnn => Box::new(BasicRnnCell::new(input_dim, hidden_dim, vb)?),
            CellKind::BasicLstm => Box::new(LstmCell::new(input_dim, hidden_dim, false, vb)?),
            CellKind::Gru => Box::new(GruCell::new(input_dim, hidden_dim, vb)?),
            CellKind::Lstm => Box::new(LstmCell::new(input_dim, hidden_dim, false, vb)?),
            CellKind::PeepholeLstm => Box::new(LstmCell::new(input_dim, hidden_dim, true, vb)?),
            CellKind::Custom(constructor) => constructor.build(input_dim, hidden_dim, vb)?,
        };
        Ok(cell)
    }
}

/// Resolve a cell kind to its constructor. Custom constructors pass through.
pub fn get_cell(kind: &CellKind) -> Arc<dyn CellConstructor> {
    match kind {
        CellKind::Custom(constructor) => Arc::clone(constructor),
        builtin => Arc::new(builtin.clone()) as Arc<dyn CellConstructor>,
    }
}

/// Elman cell: `h' = tanh(W [x, h] + b)`
pub struct BasicRnnCell {
    linear: Linear,
    hidden_dim: usize,
}

impl BasicRnnCell {
    pub fn new(input_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let linear = Linear::new(input_dim + hidden_dim, hidden_dim, true, vb.pp("linear"))?;
        Ok(Self { linear, hidden_dim })
    }
}

impl RecurrentCell for BasicRnnCell {
    fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn step(&self, input: &Tensor, state: &CellState) -> Result<CellState> {
        let xh = Tensor::cat(&[input, &state.h], 1)?;
        let h = self.linear.forward(&xh)?.tanh()?;
        Ok(CellState { h, c: None })
    }
}

/// Diagonal peephole weights from the memory cell into the gates
struct Peepholes {
    input: Tensor,
    forget: Tensor,
    output: Tensor,
}

/// LSTM cell with forget bias 1.0
///
/// Without peepholes this serves both `BasicLSTM` and `LSTM`. With them it is
/// `PeepholeLSTM`, where the input and forget gates see the previous memory and the
/// output gate sees the new one.
pub struct LstmCell {
    gates: Linear,
    peepholes: Option<Peepholes>,
    hidden_dim: usize,
}

impl LstmCell {
    pub fn new(input_dim: usize, hidden_dim: usize, peepholes: bool, vb: VarBuilder) -> Result<Self> {
        let gates = Linear::new(input_dim + hidden_dim, 4 * hidden_dim, true, vb.pp("gates"))?;

        let peepholes = if peepholes {
            Some(Peepholes {
                input: vb.get_with_hints(hidden_dim, "w_i_diag", Init::Const(0.0))?,
                forget: vb.get_with_hints(hidden_dim, "w_f_diag", Init::Const(0.0))?,
                output: vb.get_with_hints(hidden_dim, "w_o_diag", Init::Const(0.0))?,
            })
        } else {
            None
        };

        Ok(Self {
            gates,
            peepholes,
            hidden_dim,
        })
    }
}

impl RecurrentCell for LstmCell {
    fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn has_cell_state(&self) -> bool {
        true
    }

    fn step(&self, input: &Tensor, state: &CellState) -> Result<CellState> {
        let hd = self.hidden_dim;
        let c_prev = state.memory()?;

        let xh = Tensor::cat(&[input, &state.h], 1)?;
        let gates = self.gates.forward(&xh)?;

        // i = input gate, j = new input, f = forget gate, o = output gate
        let mut i = gates.narrow(1, 0, hd)?;
        let j = gates.narrow(1, hd, hd)?;
        let mut f = gates.narrow(1, 2 * hd, hd)?;
        let mut o = gates.narrow(1, 3 * hd, hd)?;

        if let Some(p) = &self.peepholes {
            i = i.add(&c_prev.broadcast_mul(&p.input)?)?;
            f = f.add(&c_prev.broadcast_mul(&p.forget)?)?;
        }

        let forget = candle_nn::ops::sigmoid(&f.affine(1.0, FORGET_BIAS)?)?;
        let c = c_prev
            .mul(&forget)?
            .add(&candle_nn::ops::sigmoid(&i)?.mul(&j.tanh()?)?)?;

        if let Some(p) = &self.peepholes {
            o = o.add(&c.broadcast_mul(&p.output)?)?;
        }

        let h = c.tanh()?.mul(&candle_nn::ops::sigmoid(&o)?)?;
        Ok(CellState { h, c: Some(c) })
    }
}

/// Gated recurrent unit
///
/// `r, u = sigmoid(W_g [x, h] + b_g)`, `c = tanh(W_c [x, r * h] + b_c)`,
/// `h' = u * h + (1 - u) * c`
pub struct GruCell {
    gates: Linear,
    candidate: Linear,
    hidden_dim: usize,
}

impl GruCell {
    pub fn new(input_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let gates = Linear::new(input_dim + hidden_dim, 2 * hidden_dim, true, vb.pp("gates"))?;
        let candidate = Linear::new(input_dim + hidden_dim, hidden_dim, true, vb.pp("candidate"))?;
        Ok(Self {
            gates,
            candidate,
            hidden_dim,
        })
    }
}

impl RecurrentCell for GruCell {
    fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn step(&self, input: &Tensor, state: &CellState) -> Result<CellState> {
        let hd = self.hidden_dim;
        let h_prev = &state.h;

        let xh = Tensor::cat(&[input, h_prev], 1)?;
        let gates = candle_nn::ops::sigmoid(&self.gates.forward(&xh)?)?;
        let r = gates.narrow(1, 0, hd)?;
        let u = gates.narrow(1, hd, hd)?;

        let x_rh = Tensor::cat(&[input, &r.mul(h_prev)?], 1)?;
        let c = self.candidate.forward(&x_rh)?.tanh()?;

        let h = u.mul(h_prev)?.add(&u.affine(-1.0, 1.0)?.mul(&c)?)?;
        Ok(CellState { h, c: None })
    }
}

/// Stack of recurrent layers, each feeding its output to the next
pub struct CellStack {
    cells: Vec<Box<dyn RecurrentCell>>,
    hidden_dim: usize,
}

impl CellStack {
    /// Create new stack
    ///
    /// # Arguments
    /// * `constructor` - Cell constructor shared by every layer
    /// * `input_dim` - Input width of the bottom layer
    /// * `hidden_dim` - Width of every layer
    /// * `depth` - Number of layers
    /// * `vb` - VarBuilder for parameter registration
    pub fn new(
        constructor: &dyn CellConstructor,
        input_dim: usize,
        hidden_dim: usize,
        depth: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if depth == 0 {
            candle_core::bail!("recurrent stack depth must be > 0");
        }

        let mut cells = Vec::with_capacity(depth);
        for i in 0..depth {
            let layer_input = if i == 0 { input_dim } else { hidden_dim };
            let cell = constructor.build(layer_input, hidden_dim, vb.pp(format!("layer_{}", i)))?;
            if cell.hidden_dim() != hidden_dim {
                candle_core::bail!(
                    "cell `{}` built with hidden_dim {} instead of {}",
                    constructor.name(),
                    cell.hidden_dim(),
                    hidden_dim
                );
            }
            cells.push(cell);
        }

        Ok(Self { cells, hidden_dim })
    }

    pub fn depth(&self) -> usize {
        self.cells.len()
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// All-zero state for every layer
    pub fn zero_state(&self, batch_size: usize, dtype: DType, device: &Device) -> Result<Vec<CellState>> {
        self.cells
            .iter()
            .map(|cell| {
                CellState::zeros(batch_size, self.hidden_dim, cell.has_cell_state(), dtype, device)
            })
            .collect()
    }

    /// Every layer's hidden state set to `h` ([batch, hidden_dim])
    pub fn seeded_state(&self, h: &Tensor) -> Result<Vec<CellState>> {
        self.cells
            .iter()
            .map(|cell| CellState::from_hidden(h.clone(), cell.has_cell_state()))
            .collect()
    }

    /// Advance every layer one step
    ///
    /// # Returns
    /// Tuple of (top layer output, new per-layer states)
    pub fn step(&self, input: &Tensor, states: &[CellState]) -> Result<(Tensor, Vec<CellState>)> {
        if states.len() != self.cells.len() {
            candle_core::bail!(
                "expected {} layer states, got {}",
                self.cells.len(),
                states.len()
            );
        }

        let mut layer_input = input.clone();
        let mut new_states = Vec::with_capacity(self.cells.len());
        for (cell, state) in self.cells.iter().zip(states) {
            let next = cell.step(&layer_input, state)?;
            layer_input = next.h.clone();
            new_states.push(next);
        }

        Ok((layer_input, new_states))
    }
}
