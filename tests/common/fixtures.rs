use std::path::{Path, PathBuf};

use candle::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use image::{ImageBuffer, Rgb};
use linprobe::config::EvalConfig;
use linprobe::encoder::{Backbone, EncoderConfig, SimclrEncoder};
use tempfile::TempDir;

/// Classes of the synthetic dataset and the base colour of their images
pub const CLASSES: [(&str, [u8; 3]); 4] = [
    ("CNV", [220, 40, 40]),
    ("DME", [40, 200, 60]),
    ("DRUSEN", [40, 60, 220]),
    ("NORMAL", [230, 230, 230]),
];

/// Projection head widths used by the tiny test encoder
pub const TINY_HIDDEN: [usize; 3] = [16, 8, 4];

/// Writes `per_class` PNGs per class under `root/<CLASS>/<CLASS>-<i>-1.png`.
/// Each image is its class colour with a small per-image brightness shift.
pub fn write_split(root: &Path, per_class: usize, size: u32) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for (class, color) in CLASSES {
        let dir = root.join(class);
        std::fs::create_dir_all(&dir).expect("Failed to create class directory");
        for i in 0..per_class {
            let shift = (i % 8) as u8 * 3;
            let img = ImageBuffer::from_fn(size, size, |x, y| {
                let stripe = if (x / 4 + y / 4) % 2 == 0 { 0 } else { 10 };
                Rgb(color.map(|c| c.saturating_sub(shift + stripe)))
            });
            let path = dir.join(format!("{}-{}-1.png", class, 1000 + i));
            img.save_with_format(&path, image::ImageFormat::Png)
                .expect("Failed to save test image");
            paths.push(path);
        }
    }
    paths
}

/// Train / validation / test trees in one temp directory (kept alive by `_dir`)
pub struct TestDataset {
    pub _dir: TempDir,
    pub train: PathBuf,
    pub val: PathBuf,
    pub test: PathBuf,
}

pub fn create_test_dataset(train: usize, val: usize, test: usize) -> TestDataset {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let train_dir = dir.path().join("train");
    let val_dir = dir.path().join("val");
    let test_dir = dir.path().join("test");
    write_split(&train_dir, train, 40);
    write_split(&val_dir, val, 40);
    write_split(&test_dir, test, 40);
    TestDataset {
        _dir: dir,
        train: train_dir,
        val: val_dir,
        test: test_dir,
    }
}

pub fn tiny_encoder_config(checkpoint: PathBuf) -> EncoderConfig {
    EncoderConfig {
        checkpoint,
        backbone: Backbone::Resnet18,
        hidden_dims: TINY_HIDDEN,
        batch_size: 8,
    }
}

/// Randomly initialised resnet18 encoder saved as safetensors at `path`
pub fn write_tiny_encoder(path: &Path) -> anyhow::Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    SimclrEncoder::from_var_builder(vb, Backbone::Resnet18, TINY_HIDDEN)?;
    varmap.save(path)?;
    Ok(())
}

/// Small, fast configuration over a test dataset
pub fn quick_config(data: &TestDataset, checkpoint: PathBuf, output: PathBuf) -> EvalConfig {
    let mut config = EvalConfig::default();
    config.data.train_dir = data.train.clone();
    config.data.val_dir = data.val.clone();
    config.data.test_dir = data.test.clone();
    config.data.fraction = 1.0;
    config.data.with_replacement = false;
    config.data.image_size = 32;
    config.encoder = tiny_encoder_config(checkpoint);
    config.probe.epochs = 5;
    config.probe.batch_size = 8;
    config.tsne.perplexity = 5.0;
    config.tsne.max_iter = 300;
    config.output.dir = output;
    config.output.plots = false;
    config
}

/// A Gaussian blob around each class centre, row-major
pub fn gaussian_blobs(centres: &[Vec<f32>], per_class: usize, spread: f32, seed: u64) -> (Vec<f32>, Vec<u32>) {
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0f32, spread).expect("valid normal");
    let mut data = Vec::new();
    let mut labels = Vec::new();
    for (class, centre) in centres.iter().enumerate() {
        for _ in 0..per_class {
            data.extend(centre.iter().map(|c| c + noise.sample(&mut rng)));
            labels.push(class as u32);
        }
    }
    (data, labels)
}
