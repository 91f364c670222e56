use clap::{Parser, Subcommand};

use crate::export::{ExportConfig, ExportMode};
use crate::training::TrainingConfig;

#[derive(Parser, Debug)]
#[command(name = "bnn-mnist", version, about = "Binarized CNN on MNIST with binary weight export")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the network, report test metrics and export the binarized first layer.
    Train {
        /// Directory receiving the config, checkpoints, logs and trained model.
        #[arg(long, default_value = "/tmp/bnn-mnist")]
        artifact_dir: String,
        /// Training configuration (JSON) to start from instead of the defaults.
        #[arg(long)]
        config: Option<String>,
        #[command(flatten)]
        overrides: TrainArgs,
    },
    /// Export the binarized first layer of an already trained model.
    Export {
        #[arg(long, default_value = "/tmp/bnn-mnist")]
        artifact_dir: String,
        #[command(flatten)]
        export: ExportArgs,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct TrainArgs {
    #[arg(long)]
    pub num_epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub num_workers: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Scale factor of the binarized kernel.
    #[arg(long)]
    pub h: Option<f64>,
    #[command(flatten)]
    pub export: ExportArgs,
}

impl TrainArgs {
    /// Applies the command line overrides on top of `base`.
    pub fn apply(&self, base: TrainingConfig) -> TrainingConfig {
        let mut config = base;
        if let Some(num_epochs) = self.num_epochs {
            config.num_epochs = num_epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(num_workers) = self.num_workers {
            config.num_workers = num_workers;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(h) = self.h {
            config.model.h = h;
        }
        config.export = self.export.apply(config.export);
        config
    }
}

#[derive(clap::Args, Debug, Default)]
pub struct ExportArgs {
    /// Text file receiving one line per output channel.
    #[arg(long)]
    pub export_path: Option<String>,
    /// Overwrite the export file instead of appending to it.
    #[arg(long)]
    pub truncate: bool,
}

impl ExportArgs {
    /// Applies the command line overrides on top of `base`.
    pub fn apply(&self, base: ExportConfig) -> ExportConfig {
        let mut export = base;
        if let Some(path) = &self.export_path {
            export.path = path.clone();
        }
        if self.truncate {
            export.mode = ExportMode::Truncate;
        }
        export
    }
}
