mod common;

use candle::{DType, Device, Tensor};
use linprobe::encoder::{Backbone, SimclrEncoder, extract_features};
use linprobe::{EvalError, FeatureDepth, Split};

#[test]
fn test_load_tiny_encoder_and_forward() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let checkpoint = dir.path().join("encoder.safetensors");
    common::write_tiny_encoder(&checkpoint)?;

    let config = common::tiny_encoder_config(checkpoint.clone());
    let encoder = SimclrEncoder::load(&checkpoint, &config, &Device::Cpu)?;
    assert_eq!(encoder.backbone(), Backbone::Resnet18);
    assert_eq!(encoder.feature_dim(FeatureDepth::Backbone), 512);
    assert_eq!(encoder.feature_dim(FeatureDepth::Projection1), 16);
    assert_eq!(encoder.feature_dim(FeatureDepth::Projection2), 8);
    assert_eq!(encoder.feature_dim(FeatureDepth::Output), 4);

    let images = Tensor::rand(0f32, 1f32, (3, 3, 32, 32), &Device::Cpu)?;
    let outputs = encoder.forward(&images)?;
    assert_eq!(outputs.get(FeatureDepth::Backbone).dims(), &[3, 512]);
    assert_eq!(outputs.get(FeatureDepth::Projection1).dims(), &[3, 16]);
    assert_eq!(outputs.get(FeatureDepth::Projection2).dims(), &[3, 8]);
    assert_eq!(outputs.get(FeatureDepth::Output).dims(), &[3, 4]);

    // Taps after a ReLU are never negative.
    let min = outputs
        .get(FeatureDepth::Projection2)
        .min_all()?
        .to_dtype(DType::F32)?
        .to_scalar::<f32>()?;
    assert!(min >= 0.0);
    Ok(())
}

#[test]
fn test_load_missing_checkpoint_fails() {
    let config = common::tiny_encoder_config("does/not/exist.safetensors".into());
    let result = SimclrEncoder::load(&config.checkpoint, &config, &Device::Cpu);
    assert!(result.is_err());
}

#[test]
fn test_load_with_wrong_head_fails() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let checkpoint = dir.path().join("encoder.safetensors");
    common::write_tiny_encoder(&checkpoint)?;

    let mut config = common::tiny_encoder_config(checkpoint.clone());
    config.hidden_dims = [32, 8, 4];
    assert!(SimclrEncoder::load(&checkpoint, &config, &Device::Cpu).is_err());
    Ok(())
}

#[test]
fn test_extract_features_per_depth() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let checkpoint = dir.path().join("encoder.safetensors");
    common::write_tiny_encoder(&checkpoint)?;
    let config = common::tiny_encoder_config(checkpoint.clone());
    let encoder = SimclrEncoder::load(&checkpoint, &config, &Device::Cpu)?;

    let images = dir.path().join("images");
    common::write_split(&images, 3, 40);
    let samples = linprobe::dataset::discover_split(&images, Split::Train)?;

    let depths = [FeatureDepth::Backbone, FeatureDepth::Projection2];
    // A batch size that does not divide the sample count.
    let bank = extract_features(&encoder, &samples, &depths, 32, 5, &Device::Cpu, "train")?;

    assert_eq!(bank.depths().count(), 2);
    assert_eq!(bank.len(), 12);
    assert_eq!(bank.get(FeatureDepth::Backbone)?.dims(), &[12, 512]);
    assert_eq!(bank.get(FeatureDepth::Projection2)?.dims(), &[12, 8]);
    assert!(matches!(
        bank.get(FeatureDepth::Output),
        Err(EvalError::MissingFeatures(FeatureDepth::Output))
    ));

    // Streaming in batches gives the same rows as one big batch.
    let whole = extract_features(&encoder, &samples, &depths, 32, 64, &Device::Cpu, "train")?;
    let diff = (bank.get(FeatureDepth::Projection2)? - whole.get(FeatureDepth::Projection2)?)?
        .abs()?
        .max_all()?
        .to_scalar::<f32>()?;
    assert!(diff < 1e-4);
    Ok(())
}
