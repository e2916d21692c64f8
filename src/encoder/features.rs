use std::collections::BTreeMap;

use candle::{Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::dataset;
use crate::error::EvalError;
use crate::models::{FeatureDepth, Sample};

use super::SimclrEncoder;

/// Features of one split, one `(N, D)` matrix per depth
#[derive(Debug, Clone, Default)]
pub struct FeatureBank {
    features: BTreeMap<FeatureDepth, Tensor>,
}

impl FeatureBank {
    pub fn insert(&mut self, depth: FeatureDepth, features: Tensor) {
        self.features.insert(depth, features);
    }

    pub fn get(&self, depth: FeatureDepth) -> Result<&Tensor, EvalError> {
        self.features
            .get(&depth)
            .ok_or(EvalError::MissingFeatures(depth))
    }

    pub fn depths(&self) -> impl Iterator<Item = FeatureDepth> + '_ {
        self.features.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.features
            .values()
            .next()
            .and_then(|t| t.dims().first().copied())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(
        "  [{prefix}] {elapsed_precise} │{bar:40.cyan/blue}│ {pos}/{len} • {per_sec} • eta {eta}",
    ) {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb.set_prefix(label.to_string());
    pb
}

/// Stream `samples` through the encoder in batches, keeping only the requested taps
///
/// Images are decoded per batch and dropped after the forward pass, so memory
/// grows with the feature widths rather than with the pixel count.
pub fn extract_features(
    encoder: &SimclrEncoder,
    samples: &[Sample],
    depths: &[FeatureDepth],
    image_size: usize,
    batch_size: usize,
    device: &Device,
    label: &str,
) -> anyhow::Result<FeatureBank> {
    let mut chunks: BTreeMap<FeatureDepth, Vec<Tensor>> =
        depths.iter().map(|&d| (d, Vec::new())).collect();

    let pb = progress_bar(samples.len() as u64, label);
    for batch in samples.chunks(batch_size.max(1)) {
        let images = dataset::load_batch(batch, image_size, device)?;
        let outputs = encoder.forward(&images)?;
        for (depth, parts) in chunks.iter_mut() {
            parts.push(outputs.get(*depth).detach());
        }
        pb.inc(batch.len() as u64);
    }
    pb.finish_and_clear();

    let mut bank = FeatureBank::default();
    for (depth, parts) in chunks {
        if parts.is_empty() {
            continue;
        }
        let features = Tensor::cat(&parts, 0)?;
        debug!(split = label, depth = %depth, shape = ?features.dims(), "features extracted");
        bank.insert(depth, features);
    }
    Ok(bank)
}
