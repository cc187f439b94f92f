/// Variational seq2seq training on the DSP homework speech features
///
/// Usage: cargo run --example train_vae -- <dataset dir> [result dir]
///
/// The dataset directory holds X.npy [sample, timestep, feature], optionally
/// y.npy and dataset.json (`magnitude_dim`).
use candle_core::Device;
use speech2vec::data::{FeatureDataset, NpyFeatureDataset};
use speech2vec::export::NpzExport;
use speech2vec::training::{Trainer, TrainingConfig};
use speech2vec::{Architecture, CellKind, ModelOptions, Seq2seqConfig};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("=== Variational Seq2seq Autoencoder ===");

    let mut args = std::env::args().skip(1);
    let data_path = args.next().unwrap_or_else(|| "data/dsp_hw2".to_string());
    let result_dir = args.next().unwrap_or_else(|| "result/dsp_hw2".to_string());

    let device = if candle_core::utils::cuda_is_available() {
        Device::new_cuda(0)?
    } else {
        Device::Cpu
    };
    log::info!("Using device: {:?}", device);

    let seed = 0;
    let mut dataset = NpyFeatureDataset::from_directory(&data_path, seed)?;
    let (samples, timestep, feature) = dataset.x().dim();

    log::info!("Dataset loaded:");
    log::info!("  - Sequences: {}", samples);
    log::info!("  - Timestep: {}", timestep);
    log::info!("  - Feature: {} (magnitude {})", feature, dataset.magnitude_dim());

    let batch_size = 32;
    let model_config = Seq2seqConfig {
        batch_input_shape: (batch_size, timestep, feature),
        cells: (CellKind::Gru, CellKind::Gru),
        hidden_dim: 512,
        latent_dim: 2,
        depth: (1, 1),
        architecture: Architecture::VariationalSeq2seq,
        options: ModelOptions {
            peek: false,
            bidirectional: true,
        },
    };

    let training_config = TrainingConfig {
        nb_epochs: 5000,
        keep_prob: 0.8,
        learning_rate: 1e-3,
        seed,
        result_dir: result_dir.into(),
        ..Default::default()
    };

    log::info!("Model configuration: {:#?}", model_config);
    log::info!("Training configuration: {:#?}", training_config);

    let mut trainer = Trainer::new(model_config, training_config, device)?;
    let summary = trainer.run(&mut dataset, &NpzExport)?;

    log::info!("\n=== Training Complete ===");
    log::info!("Min loss {} at epoch {}", summary.min_loss, summary.best_epoch);
    log::info!("Best parameters: {:?}", summary.final_path);
    log::info!("Export: {:?}", trainer.export_path());

    Ok(())
}
