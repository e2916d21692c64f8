//! Command-line surface of the `linprobe` binary
use std::path::PathBuf;

use clap::Parser;

use crate::config::EvalConfig;
use crate::encoder::Backbone;
use crate::models::FeatureDepth;

#[derive(Parser)]
#[command(name = "linprobe")]
#[command(about = "Linear evaluation of a frozen SimCLR encoder")]
pub struct Cli {
    /// Encoder checkpoint (safetensors)
    #[arg(value_name = "ENCODER")]
    pub encoder: PathBuf,

    /// JSON run configuration; flags below override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub train_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub val_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub test_dir: Option<PathBuf>,

    /// Where plots, probes and the report go (must be empty)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Share of the training split used to fit the probes
    #[arg(long)]
    pub fraction: Option<f64>,

    #[arg(long)]
    pub epochs: Option<usize>,

    /// Probe mini-batch size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Epochs without validation improvement before stopping
    #[arg(long)]
    pub patience: Option<usize>,

    /// Feature depths to evaluate
    #[arg(long, value_enum, value_delimiter = ',')]
    pub depths: Option<Vec<FeatureDepth>>,

    #[arg(long, value_enum)]
    pub backbone: Option<Backbone>,

    #[arg(long)]
    pub image_size: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Skip the t-SNE visualisation
    #[arg(long)]
    pub no_tsne: bool,

    /// Do not render PNG plots
    #[arg(long)]
    pub no_plots: bool,

    /// Embed at most this many training points with t-SNE
    #[arg(long)]
    pub tsne_max_points: Option<usize>,

    /// Bundle the output directory into this .tar.zst file
    #[arg(long, value_name = "FILE")]
    pub archive: Option<PathBuf>,

    /// Run on the CPU even when an accelerator is available
    #[arg(long)]
    pub cpu: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply the flags on top of the JSON config (or the defaults) and validate
    pub fn into_config(self) -> anyhow::Result<EvalConfig> {
        let mut config = match &self.config {
            Some(path) => EvalConfig::from_file(path)?,
            None => EvalConfig::default(),
        };

        config.encoder.checkpoint = self.encoder;
        if let Some(dir) = self.train_dir {
            config.data.train_dir = dir;
        }
        if let Some(dir) = self.val_dir {
            config.data.val_dir = dir;
        }
        if let Some(dir) = self.test_dir {
            config.data.test_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output.dir = dir;
        }
        if let Some(fraction) = self.fraction {
            config.data.fraction = fraction;
        }
        if let Some(epochs) = self.epochs {
            config.probe.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.probe.batch_size = batch_size;
        }
        if let Some(patience) = self.patience {
            config.probe.patience = patience;
        }
        if let Some(depths) = self.depths {
            config.depths = depths;
        }
        if let Some(backbone) = self.backbone {
            config.encoder.backbone = backbone;
        }
        if let Some(size) = self.image_size {
            config.data.image_size = size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.tsne_max_points.is_some() {
            config.tsne.max_points = self.tsne_max_points;
        }
        if self.archive.is_some() {
            config.output.archive = self.archive;
        }
        config.visualize &= !self.no_tsne;
        config.output.plots &= !self.no_plots;
        config.cpu |= self.cpu;

        config.validate()?;
        Ok(config)
    }
}
