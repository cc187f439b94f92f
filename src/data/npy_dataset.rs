/// NumPy feature dataset (.npy format)
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::{s, Array1, Array3, Axis};
use ndarray_npy::ReadNpyExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::FeatureDataset;
use crate::{Result, Seq2seqError};

/// Metadata from dataset.json
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DatasetMetadata {
    /// Width of the magnitude part of a frame; the rest is phase.
    /// Defaults to half the feature width.
    #[serde(default)]
    pub magnitude_dim: Option<usize>,
    #[serde(default)]
    pub description: String,
}

/// In-memory feature dataset
pub struct NpyFeatureDataset {
    x: Array3<f32>,
    y: Option<Array1<i64>>,
    metadata: DatasetMetadata,
    magnitude_dim: usize,
    cursor: usize,
    rng: StdRng,
}

impl NpyFeatureDataset {
    /// Create dataset from arrays
    ///
    /// # Arguments
    /// * `x` - Features [sample, timestep, feature]
    /// * `y` - Optional labels, one per sample
    /// * `metadata` - Dataset metadata
    /// * `seed` - Seed for shuffled batches
    pub fn new(
        x: Array3<f32>,
        y: Option<Array1<i64>>,
        metadata: DatasetMetadata,
        seed: u64,
    ) -> Result<Self> {
        let (samples, _, feature) = x.dim();
        if samples == 0 {
            return Err(Seq2seqError::Dataset("dataset has no samples".to_string()));
        }

        if let Some(labels) = &y {
            if labels.len() != samples {
                return Err(Seq2seqError::Dataset(format!(
                    "{} labels for {} samples",
                    labels.len(),
                    samples
                )));
            }
        }

        let magnitude_dim = metadata.magnitude_dim.unwrap_or(feature / 2);
        if magnitude_dim > feature {
            return Err(Seq2seqError::Dataset(format!(
                "magnitude_dim {} exceeds feature width {}",
                magnitude_dim, feature
            )));
        }

        Ok(Self {
            x,
            y,
            metadata,
            magnitude_dim,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Load from directory containing X.npy, optional y.npy and dataset.json
    pub fn from_directory<P: AsRef<Path>>(path: P, seed: u64) -> Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading feature dataset from: {:?}", dir);

        let metadata_path = dir.join("dataset.json");
        let metadata: DatasetMetadata = if metadata_path.exists() {
            let reader = BufReader::new(File::open(&metadata_path)?);
            serde_json::from_reader(reader)?
        } else {
            log::warn!("dataset.json not found, splitting frames in half");
            DatasetMetadata::default()
        };

        let x = Array3::<f32>::read_npy(File::open(dir.join("X.npy"))?)?;
        log::info!("Loaded X: shape {:?}", x.shape());

        let labels_path = dir.join("y.npy");
        let y = if labels_path.exists() {
            let y = Array1::<i64>::read_npy(File::open(&labels_path)?)?;
            log::info!("Loaded y: {} labels", y.len());
            Some(y)
        } else {
            None
        };

        Self::new(x, y, metadata, seed)
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn magnitude_dim(&self) -> usize {
        self.magnitude_dim
    }
}

impl FeatureDataset for NpyFeatureDataset {
    fn x(&self) -> &Array3<f32> {
        &self.x
    }

    fn y(&self) -> Option<&Array1<i64>> {
        self.y.as_ref()
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn next_batch(&mut self, batch_size: usize, shuffle: bool) -> Result<Array3<f32>> {
        let samples = self.len();
        if batch_size == 0 {
            return Err(Seq2seqError::Dataset("batch size must be > 0".to_string()));
        }

        let indices: Vec<usize> = if shuffle {
            if batch_size > samples {
                return Err(Seq2seqError::Dataset(format!(
                    "cannot draw {} distinct samples from {}",
                    batch_size, samples
                )));
            }
            rand::seq::index::sample(&mut self.rng, samples, batch_size).into_vec()
        } else {
            let indices = (0..batch_size).map(|i| (self.cursor + i) % samples).collect();
            self.cursor = (self.cursor + batch_size) % samples;
            indices
        };

        Ok(self.x.select(Axis(0), &indices))
    }

    fn split_x(&self, x: &Array3<f32>) -> Result<(Array3<f32>, Array3<f32>)> {
        let feature = x.shape()[2];
        if feature < self.magnitude_dim {
            return Err(Seq2seqError::Shape {
                expected: vec![x.shape()[0], x.shape()[1], self.x.shape()[2]],
                actual: x.shape().to_vec(),
            });
        }

        let magnitude = x.slice(s![.., .., ..self.magnitude_dim]).to_owned();
        let phase = x.slice(s![.., .., self.magnitude_dim..]).to_owned();
        Ok((magnitude, phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::WriteNpyExt;
    use std::collections::HashSet;

    fn ramp(samples: usize, timestep: usize, feature: usize) -> Array3<f32> {
        Array3::from_shape_fn((samples, timestep, feature), |(n, t, f)| {
            (n * 100 + t * 10 + f) as f32
        })
    }

    fn sample_ids(batch: &Array3<f32>) -> Vec<usize> {
        batch
            .axis_iter(Axis(0))
            .map(|seq| (seq[[0, 0]] / 100.0) as usize)
            .collect()
    }

    #[test]
    fn test_sequential_batches_wrap() -> Result<()> {
        let mut dataset = NpyFeatureDataset::new(ramp(5, 2, 4), None, DatasetMetadata::default(), 0)?;

        assert_eq!(sample_ids(&dataset.next_batch(3, false)?), vec![0, 1, 2]);
        assert_eq!(sample_ids(&dataset.next_batch(3, false)?), vec![3, 4, 0]);

        dataset.reset();
        assert_eq!(sample_ids(&dataset.next_batch(2, false)?), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_shuffled_batches_are_distinct_and_seeded() -> Result<()> {
        let mut a = NpyFeatureDataset::new(ramp(10, 2, 4), None, DatasetMetadata::default(), 3)?;
        let mut b = NpyFeatureDataset::new(ramp(10, 2, 4), None, DatasetMetadata::default(), 3)?;

        for _ in 0..5 {
            let ids = sample_ids(&a.next_batch(4, true)?);
            let unique: HashSet<_> = ids.iter().collect();
            assert_eq!(unique.len(), 4);
            assert_eq!(ids, sample_ids(&b.next_batch(4, true)?));
        }

        assert!(matches!(a.next_batch(11, true), Err(Seq2seqError::Dataset(_))));
        Ok(())
    }

    #[test]
    fn test_split_x() -> Result<()> {
        let dataset = NpyFeatureDataset::new(
            ramp(2, 3, 6),
            None,
            DatasetMetadata {
                magnitude_dim: Some(4),
                ..Default::default()
            },
            0,
        )?;

        let (magnitude, phase) = dataset.split_x(dataset.x())?;
        assert_eq!(magnitude.shape(), &[2, 3, 4]);
        assert_eq!(phase.shape(), &[2, 3, 2]);
        assert_eq!(phase[[1, 2, 0]], 124.0);
        Ok(())
    }

    #[test]
    fn test_label_count_must_match() {
        let labels = Array1::from(vec![0i64, 1]);
        let result = NpyFeatureDataset::new(ramp(3, 2, 2), Some(labels), DatasetMetadata::default(), 0);
        assert!(matches!(result, Err(Seq2seqError::Dataset(_))));
    }

    #[test]
    fn test_from_directory() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("speech2vec_dataset_{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;

        ramp(4, 3, 6).write_npy(File::create(dir.join("X.npy"))?)?;
        Array1::from(vec![0i64, 1, 0, 1]).write_npy(File::create(dir.join("y.npy"))?)?;
        std::fs::write(dir.join("dataset.json"), r#"{"magnitude_dim": 2}"#)?;

        let dataset = NpyFeatureDataset::from_directory(&dir, 0)?;
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.magnitude_dim(), 2);
        assert_eq!(dataset.y().map(|y| y.len()), Some(4));

        std::fs::remove_dir_all(&dir).ok();
        Ok(())
    }
}
