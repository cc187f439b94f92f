/// Export of reconstructions and codes
use std::fs::File;
use std::path::Path;

use ndarray::{Array2, Array3};
use ndarray_npy::NpzWriter;

use crate::Result;

/// Destination for the final evaluation artifacts
pub trait ExportSink {
    /// Write one artifact holding the three named arrays
    ///
    /// # Arguments
    /// * `path` - Output file
    /// * `features` - Reconstructed magnitude part [sample, timestep, magnitude_dim]
    /// * `phase` - Reconstructed phase part [sample, timestep, feature - magnitude_dim]
    /// * `codes` - Codes [sample, code_dim]
    fn save_export(
        &self,
        path: &Path,
        features: &Array3<f32>,
        phase: &Array3<f32>,
        codes: &Array2<f32>,
    ) -> Result<()>;
}

/// `.npz` archive with `feat`, `phase` and `code` entries
#[derive(Debug, Clone, Copy, Default)]
pub struct NpzExport;

impl ExportSink for NpzExport {
    fn save_export(
        &self,
        path: &Path,
        features: &Array3<f32>,
        phase: &Array3<f32>,
        codes: &Array2<f32>,
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array("feat", features)?;
        npz.add_array("phase", phase)?;
        npz.add_array("code", codes)?;
        npz.finish()?;

        log::info!(
            "Exported {} reconstructions and codes to {:?}",
            features.shape()[0],
            path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::NpzReader;

    #[test]
    fn test_npz_export_entries() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("speech2vec_export_{}", std::process::id()));
        let path = dir.join("nested").join("model.npz");

        let features = Array3::<f32>::ones((3, 4, 2));
        let phase = Array3::<f32>::zeros((3, 4, 1));
        let codes = Array2::from_shape_fn((3, 2), |(i, j)| (i * 2 + j) as f32);
        NpzExport.save_export(&path, &features, &phase, &codes)?;

        let mut npz = NpzReader::new(File::open(&path)?)?;
        let mut names: Vec<String> = npz
            .names()?
            .into_iter()
            .map(|name| name.trim_end_matches(".npy").to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["code", "feat", "phase"]);

        let read_codes: Array2<f32> = npz.by_name("code")?;
        assert_eq!(read_codes, codes);
        let read_phase: Array3<f32> = npz.by_name("phase")?;
        assert_eq!(read_phase.shape(), &[3, 4, 1]);

        std::fs::remove_dir_all(&dir).ok();
        Ok(())
    }
}
