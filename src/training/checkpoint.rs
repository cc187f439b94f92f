/// Model checkpointing with safetensors
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use safetensors::tensor::SafeTensors;

use crate::models::ParamRegistry;
use crate::{Result, Seq2seqError};

/// Header key the metadata JSON is stored under
const METADATA_KEY: &str = "checkpoint";

/// Checkpoint metadata
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Epoch the parameters were taken at
    pub epoch: usize,
    /// Training loss at that epoch
    pub loss: Option<f32>,
    pub rec_loss: Option<f32>,
    pub latent_loss: Option<f32>,
    /// Descriptive model name
    pub model: Option<String>,
}

/// Where parameter snapshots go
pub trait CheckpointStore {
    /// Persist every parameter of `registry` to `path`
    fn save(&self, path: &Path, registry: &ParamRegistry, metadata: &CheckpointMetadata) -> Result<()>;

    /// Overwrite every parameter of `registry` from `path`
    fn load(&self, path: &Path, registry: &ParamRegistry) -> Result<CheckpointMetadata>;
}

/// Single-file safetensors checkpoints with the metadata in the header
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsStore;

impl SafetensorsStore {
    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write `bytes` and flush them to disk before the file is renamed
    fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }
}

impl CheckpointStore for SafetensorsStore {
    /// Writes to a sibling temp file first, so a crash never leaves a
    /// half-written checkpoint under `path`
    fn save(&self, path: &Path, registry: &ParamRegistry, metadata: &CheckpointMetadata) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tensors = registry.tensors()?;
        let header = HashMap::from([(METADATA_KEY.to_string(), serde_json::to_string(metadata)?)]);

        let tmp = Self::temp_path(path);
        let written = safetensors::tensor::serialize(tensors, &Some(header))
            .map_err(Seq2seqError::from)
            .and_then(|bytes| Self::write_synced(&tmp, &bytes))
            .and_then(|()| Ok(std::fs::rename(&tmp, path)?));
        if let Err(err) = written {
            std::fs::remove_file(&tmp).ok();
            return Err(err);
        }

        log::debug!("Saved checkpoint to {:?} (epoch {})", path, metadata.epoch);
        Ok(())
    }

    fn load(&self, path: &Path, registry: &ParamRegistry) -> Result<CheckpointMetadata> {
        let data = std::fs::read(path)?;
        let metadata = parse_metadata(&data)?;

        let tensors: HashMap<String, Tensor> = candle_core::safetensors::load_buffer(&data, registry.device())?;
        registry.load_tensors(&tensors)?;

        log::info!("Loaded checkpoint {:?} (epoch {})", path, metadata.epoch);
        Ok(metadata)
    }
}

fn parse_metadata(data: &[u8]) -> Result<CheckpointMetadata> {
    let (_, header) = SafeTensors::read_metadata(data)?;
    match header.metadata().as_ref().and_then(|m| m.get(METADATA_KEY)) {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Err(Seq2seqError::Checkpoint(format!(
            "no `{}` entry in safetensors header",
            METADATA_KEY
        ))),
    }
}

/// Read only the metadata of a checkpoint
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<CheckpointMetadata> {
    let data = std::fs::read(path.as_ref())?;
    parse_metadata(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Linear;
    use candle_core::{DType, Device};

    fn registry(seed: u64) -> Result<ParamRegistry> {
        let registry = ParamRegistry::new(DType::F32, &Device::Cpu);
        let vb = registry.var_builder();
        Linear::new(3, 2, true, vb.pp("proj"))?;
        drop(vb);
        registry.initialize(seed)?;
        Ok(registry)
    }

    fn temp_dir(name: &str) -> Result<PathBuf> {
        let dir = std::env::temp_dir().join(format!("speech2vec_ckpt_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    #[test]
    fn test_save_load_round_trip() -> Result<()> {
        let dir = temp_dir("round_trip")?;
        let path = dir.join("model.safetensors");

        let source = registry(1)?;
        let metadata = CheckpointMetadata {
            epoch: 12,
            loss: Some(0.5),
            rec_loss: Some(0.25),
            latent_loss: Some(0.25),
            model: Some("proj".to_string()),
        };
        SafetensorsStore.save(&path, &source, &metadata)?;
        assert!(!SafetensorsStore::temp_path(&path).exists());

        let target = registry(2)?;
        let loaded = SafetensorsStore.load(&path, &target)?;
        assert_eq!(loaded, metadata);
        assert_eq!(read_metadata(&path)?, metadata);

        let (a, b) = (source.tensors()?, target.tensors()?);
        for (name, tensor) in &a {
            assert_eq!(
                tensor.flatten_all()?.to_vec1::<f32>()?,
                b[name].flatten_all()?.to_vec1::<f32>()?
            );
        }

        std::fs::remove_dir_all(&dir).ok();
        Ok(())
    }

    #[test]
    fn test_load_into_mismatched_model_fails() -> Result<()> {
        let dir = temp_dir("mismatch")?;
        let path = dir.join("model.safetensors");
        SafetensorsStore.save(&path, &registry(1)?, &CheckpointMetadata::default())?;

        let other = ParamRegistry::new(DType::F32, &Device::Cpu);
        Linear::new(4, 2, true, other.var_builder().pp("proj"))?;
        assert!(matches!(
            SafetensorsStore.load(&path, &other),
            Err(Seq2seqError::Shape { .. })
        ));

        std::fs::remove_dir_all(&dir).ok();
        Ok(())
    }

    #[test]
    fn test_failed_save_leaves_no_temp_file() -> Result<()> {
        let dir = temp_dir("failed_save")?;
        // a non-empty directory where the checkpoint should go makes the rename fail
        let path = dir.join("model.safetensors");
        std::fs::create_dir_all(path.join("occupied"))?;

        let result = SafetensorsStore.save(&path, &registry(1)?, &CheckpointMetadata::default());
        assert!(result.is_err());
        assert!(!SafetensorsStore::temp_path(&path).exists());
        assert!(path.join("occupied").is_dir());

        std::fs::remove_dir_all(&dir).ok();
        Ok(())
    }

    #[test]
    fn test_missing_file_fails() -> Result<()> {
        let target = registry(0)?;
        let result = SafetensorsStore.load(Path::new("/nonexistent/model.safetensors"), &target);
        assert!(matches!(result, Err(Seq2seqError::Io(_))));
        Ok(())
    }
}
