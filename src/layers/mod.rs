/// Neural network layer primitives
///
/// This module contains the building blocks for the autoencoders:
/// - Linear projections
/// - Recurrent cells (BasicRNN, BasicLSTM, GRU, LSTM) and stacks of them
/// - Additive attention over encoder annotations
/// - Seeded dropout and the forward-pass noise context

pub mod attention;
pub mod cells;
pub mod dropout;
pub mod linear;

pub use attention::Attention;
pub use cells::{get_cell, CellConstructor, CellKind, CellStack, CellState, RecurrentCell};
pub use dropout::ForwardMode;
pub use linear::Linear;
