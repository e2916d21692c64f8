pub mod labels;
pub mod preprocessing;

use std::path::Path;

use anyhow::Context;
use candle::{Device, Tensor};
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::DataConfig;
use crate::error::EvalError;
use crate::models::{DatasetSplits, Sample, Split};

pub use labels::LabelEncoder;

/// Derive the class label from a file name: everything before the first `-`
///
/// `CNV-1016042-1.jpeg` becomes `CNV`. A name without `-` is used whole.
pub fn label_from_path(path: &Path) -> Result<String, EvalError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| EvalError::BadFileName(path.to_path_buf()))?;

    match name.split('-').next() {
        Some(label) if !label.is_empty() => Ok(label.to_string()),
        _ => Err(EvalError::BadFileName(path.to_path_buf())),
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// List every file at `root/<class-dir>/<file>`, sorted by path
pub fn discover_split(root: &Path, split: Split) -> anyhow::Result<Vec<Sample>> {
    let mut paths = Vec::new();

    let class_dirs = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read {} directory {:?}", split, root))?;
    for class_dir in class_dirs {
        let class_dir = class_dir?.path();
        if !class_dir.is_dir() || is_hidden(&class_dir) {
            continue;
        }
        for entry in std::fs::read_dir(&class_dir)
            .with_context(|| format!("Failed to read class directory {:?}", class_dir))?
        {
            let path = entry?.path();
            if path.is_file() && !is_hidden(&path) {
                paths.push(path);
            }
        }
    }

    if paths.is_empty() {
        return Err(EvalError::EmptySplit {
            split,
            root: root.to_path_buf(),
        }
        .into());
    }

    paths.sort();
    let samples = paths
        .into_iter()
        .map(|path| {
            let label = label_from_path(&path)?;
            Ok(Sample { path, label })
        })
        .collect::<Result<Vec<_>, EvalError>>()?;

    debug!(split = %split, root = ?root, count = samples.len(), "discovered split");
    Ok(samples)
}

/// Draw `floor(len * fraction)` samples, at least one for a non-empty input
pub fn subsample<R: Rng>(
    samples: &[Sample],
    fraction: f64,
    with_replacement: bool,
    rng: &mut R,
) -> Vec<Sample> {
    if samples.is_empty() {
        return Vec::new();
    }
    let count = ((samples.len() as f64 * fraction).floor() as usize).clamp(1, samples.len());

    if with_replacement {
        (0..count)
            .map(|_| samples[rng.random_range(0..samples.len())].clone())
            .collect()
    } else {
        rand::seq::index::sample(rng, samples.len(), count)
            .into_iter()
            .map(|idx| samples[idx].clone())
            .collect()
    }
}

/// Discover all three splits and sub-sample the training split
pub fn discover_splits<R: Rng>(config: &DataConfig, rng: &mut R) -> anyhow::Result<DatasetSplits> {
    let train_all = discover_split(&config.train_dir, Split::Train)?;
    let validation = discover_split(&config.val_dir, Split::Validation)?;
    let test = discover_split(&config.test_dir, Split::Test)?;

    // With replacement even the full fraction is a bootstrap draw.
    let train = if config.fraction < 1.0 || config.with_replacement {
        subsample(&train_all, config.fraction, config.with_replacement, rng)
    } else {
        train_all.clone()
    };

    info!(
        train_total = train_all.len(),
        train = train.len(),
        validation = validation.len(),
        test = test.len(),
        "dataset splits ready"
    );

    Ok(DatasetSplits {
        train,
        validation,
        test,
    })
}

/// Decode a batch of samples in parallel into an `(N, 3, size, size)` tensor
pub fn load_batch(samples: &[Sample], size: usize, device: &Device) -> anyhow::Result<Tensor> {
    let images = samples
        .par_iter()
        .map(|sample| preprocessing::load_image(&sample.path, size as u32))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let data: Vec<f32> = images.into_iter().flatten().collect();
    let batch = Tensor::from_vec(data, (samples.len(), 3, size, size), device)?;
    Ok(batch)
}
