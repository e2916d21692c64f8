//! Run configuration, loadable from JSON and overridable from the CLI

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::encoder::EncoderConfig;
use crate::error::EvalError;
use crate::models::FeatureDepth;
use crate::probe::ProbeParams;
use crate::tsne::TsneParams;

/// Where the images live and how they are sampled and resized
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub train_dir: PathBuf,
    pub val_dir: PathBuf,
    pub test_dir: PathBuf,
    /// Share of the training split used to fit the probes
    pub fraction: f64,
    /// Draw the training subset with replacement (duplicates allowed)
    pub with_replacement: bool,
    /// Side length images are resized to
    pub image_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/train"),
            val_dir: PathBuf::from("data/val"),
            test_dir: PathBuf::from("data/test"),
            fraction: 0.1,
            with_replacement: true,
            image_size: 224,
        }
    }
}

/// What gets written and where
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Render PNG plots
    pub plots: bool,
    /// Save each trained probe as safetensors
    pub save_probes: bool,
    /// Bundle the output directory into this .tar.zst file
    pub archive: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("linprobe-out"),
            plots: true,
            save_probes: true,
            archive: None,
        }
    }
}

/// Complete configuration of a linear evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub data: DataConfig,
    pub encoder: EncoderConfig,
    pub probe: ProbeParams,
    pub tsne: TsneParams,
    /// Run t-SNE on the training features of every depth
    pub visualize: bool,
    pub depths: Vec<FeatureDepth>,
    pub output: OutputConfig,
    pub seed: u64,
    /// Force CPU even when an accelerator is available
    pub cpu: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            encoder: EncoderConfig::default(),
            probe: ProbeParams::default(),
            tsne: TsneParams::default(),
            visualize: true,
            depths: vec![
                FeatureDepth::Projection2,
                FeatureDepth::Projection1,
                FeatureDepth::Backbone,
            ],
            output: OutputConfig::default(),
            seed: 666,
            cpu: false,
        }
    }
}

impl EvalConfig {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: EvalConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    }

    /// Reject values no run can succeed with
    pub fn validate(&self) -> Result<(), EvalError> {
        let invalid = |msg: String| Err(EvalError::InvalidConfig(msg));

        if !(self.data.fraction > 0.0 && self.data.fraction <= 1.0) {
            return invalid(format!("fraction must be in (0, 1], got {}", self.data.fraction));
        }
        if self.data.image_size < 32 {
            return invalid(format!("image size must be at least 32, got {}", self.data.image_size));
        }
        if self.encoder.batch_size == 0 || self.probe.batch_size == 0 {
            return invalid("batch sizes must be positive".to_string());
        }
        if self.probe.epochs == 0 {
            return invalid("epochs must be positive".to_string());
        }
        if self.probe.learning_rate <= 0.0 {
            return invalid(format!("learning rate must be positive, got {}", self.probe.learning_rate));
        }
        if self.depths.is_empty() {
            return invalid("at least one feature depth is required".to_string());
        }
        if self.tsne.perplexity <= 0.0 {
            return invalid(format!("perplexity must be positive, got {}", self.tsne.perplexity));
        }
        if !(self.tsne.early_exaggeration > 0.0) {
            return invalid(format!(
                "early exaggeration must be positive, got {}",
                self.tsne.early_exaggeration
            ));
        }
        if let Some(rate) = self.tsne.learning_rate.filter(|r| !(*r > 0.0)) {
            return invalid(format!("t-SNE learning rate must be positive, got {}", rate));
        }
        if self.encoder.hidden_dims.iter().any(|&d| d == 0) {
            return invalid("projection head widths must be positive".to_string());
        }
        Ok(())
    }
}
