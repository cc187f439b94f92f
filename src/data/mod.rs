/// Feature datasets for autoencoder training
pub mod npy_dataset;

pub use npy_dataset::{DatasetMetadata, NpyFeatureDataset};

use ndarray::{Array1, Array3};

use crate::Result;

/// Source of fixed-shape feature batches
///
/// `x` holds every sequence as [sample, timestep, feature]. A feature frame
/// is a magnitude part followed by a phase part; `split_x` separates them.
pub trait FeatureDataset {
    /// Full feature tensor
    fn x(&self) -> &Array3<f32>;

    /// Labels, if the dataset has any (never used for training)
    fn y(&self) -> Option<&Array1<i64>>;

    /// Number of sequences
    fn len(&self) -> usize {
        self.x().shape()[0]
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewind the sequential cursor
    fn reset(&mut self);

    /// Next batch of exactly `batch_size` sequences
    ///
    /// # Arguments
    /// * `batch_size` - Number of sequences
    /// * `shuffle` - Random sample without replacement; otherwise the next
    ///   sequences in order, wrapping around at the end
    fn next_batch(&mut self, batch_size: usize, shuffle: bool) -> Result<Array3<f32>>;

    /// Split frames into (magnitude, phase) along the feature axis
    fn split_x(&self, x: &Array3<f32>) -> Result<(Array3<f32>, Array3<f32>)>;
}
