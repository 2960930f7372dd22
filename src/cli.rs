//! Command line entry point: argument parsing and the load → augment → train
//! pipeline behind it.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use burn::{config::Config, tensor::backend::AutodiffBackend};
use clap::Parser;

use crate::{
    augment::augment_dataset,
    driving_log::DatasetLoader,
    preprocess::ImagePreprocessor,
    training::{self, TrainingConfig, TrainingOutcome},
};

pub const DEFAULT_LOG: &str = "data/driving_log.csv";

/// Exit code when a supplied log path is not a regular file.
pub const EXIT_BAD_LOG_PATH: u8 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "steering-trainer",
    version,
    about = "Train a steering-angle model with simulator data"
)]
pub struct Cli {
    /// CSV files generated by the simulator
    #[arg(short, long, num_args = 0.., default_value = DEFAULT_LOG)]
    pub csv: Vec<PathBuf>,

    /// List the output shape of each model layer
    #[arg(short, long)]
    pub list: bool,

    /// JSON training configuration overriding the defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where to write the trained model (without extension)
    #[arg(long)]
    pub artifact: Option<String>,
}

/// Runs the command and returns the process exit code.
pub fn run<B: AutodiffBackend>(cli: &Cli, device: &B::Device) -> Result<u8> {
    let mut config = match &cli.config {
        Some(path) => TrainingConfig::load(path)
            .map_err(|err| anyhow!("failed to load config {}: {err}", path.display()))?,
        None => TrainingConfig::new(),
    };
    if let Some(artifact) = &cli.artifact {
        config.artifact_path = artifact.clone();
    }

    if cli.list {
        for layer in config.model.layer_shapes() {
            println!("{layer}");
        }
        return Ok(0);
    }

    if let Some(path) = cli.csv.iter().find(|path| !path.is_file()) {
        log::error!("Not a CSV file: {}", path.display());
        return Ok(EXIT_BAD_LOG_PATH);
    }

    let loader = DatasetLoader::new(ImagePreprocessor::new(config.preprocess.clone()));
    let dataset = loader
        .load_all(cli.csv.as_slice())
        .context("failed to load driving logs")?;
    let dataset = augment_dataset(&dataset)?;

    let model = config
        .model
        .init::<B>(device)
        .context("failed to build model")?;
    let (_, report) = training::train(&config, model, dataset, device)?;

    match report.outcome {
        TrainingOutcome::Completed => log::info!(
            "Training complete after {} epochs, model saved to {}",
            report.epochs.len(),
            report.artifact.display()
        ),
        TrainingOutcome::EarlyStopped { epoch } => log::info!(
            "Training stopped early at epoch {epoch}, model saved to {}",
            report.artifact.display()
        ),
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_the_bundled_log() {
        let cli = Cli::parse_from(["steering-trainer"]);

        assert_eq!(cli.csv, vec![PathBuf::from(DEFAULT_LOG)]);
        assert!(!cli.list);
    }

    #[test]
    fn accepts_several_logs() {
        let cli = Cli::parse_from(["steering-trainer", "-c", "a.csv", "b.csv", "--list"]);

        assert_eq!(cli.csv, vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")]);
        assert!(cli.list);
    }
}
