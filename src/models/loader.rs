/// Weight loading from safetensors checkpoints
use std::path::Path;

use candle_core::{DType, Device};

use super::{ParamRegistry, Seq2seqAutoencoder};
use crate::config::Seq2seqConfig;
use crate::training::checkpoint::{CheckpointStore, SafetensorsStore};

/// Load model from a checkpoint written during training
///
/// # Arguments
/// * `config` - Model configuration the checkpoint was trained with
/// * `weights_path` - Path to safetensors file
/// * `device` - Device to load model on
///
/// # Returns
/// Loaded model and the registry holding its parameters
pub fn load_model<P: AsRef<Path>>(
    config: Seq2seqConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<(Seq2seqAutoencoder, ParamRegistry)> {
    let registry = ParamRegistry::new(DType::F32, device);
    let model = Seq2seqAutoencoder::new(config, registry.var_builder())?;

    let metadata = SafetensorsStore.load(weights_path.as_ref(), &registry)?;
    if let Some(name) = &metadata.model {
        if *name != model.name() {
            log::warn!(
                "Checkpoint was written by {}, loading into {}",
                name,
                model.name()
            );
        }
    }

    Ok((model, registry))
}
