use std::path::PathBuf;

use clap::Parser;
use linprobe::cli::Cli;
use linprobe::encoder::Backbone;
use linprobe::{EvalError, FeatureDepth};

#[test]
fn test_flags_override_defaults() -> anyhow::Result<()> {
    let cli = Cli::try_parse_from([
        "linprobe",
        "encoder.safetensors",
        "--no-tsne",
        "--depths",
        "output,backbone",
        "--archive",
        "run.tar.zst",
        "--cpu",
        "--epochs",
        "3",
        "--backbone",
        "resnet18",
        "--output-dir",
        "out",
    ])?;
    let config = cli.into_config()?;

    assert_eq!(config.encoder.checkpoint, PathBuf::from("encoder.safetensors"));
    assert!(!config.visualize);
    assert!(config.output.plots);
    assert_eq!(config.depths, vec![FeatureDepth::Output, FeatureDepth::Backbone]);
    assert_eq!(config.output.archive, Some(PathBuf::from("run.tar.zst")));
    assert!(config.cpu);
    assert_eq!(config.probe.epochs, 3);
    assert_eq!(config.encoder.backbone, Backbone::Resnet18);
    assert_eq!(config.output.dir, PathBuf::from("out"));
    // Untouched values keep their defaults.
    assert_eq!(config.probe.batch_size, 64);
    assert_eq!(config.seed, 666);
    Ok(())
}

#[test]
fn test_flags_override_config_file() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("run.json");
    std::fs::write(
        &path,
        r#"{ "data": { "fraction": 0.5 }, "probe": { "epochs": 10 }, "visualize": false, "cpu": true }"#,
    )?;

    let cli = Cli::try_parse_from([
        "linprobe",
        "encoder.safetensors",
        "--config",
        path.to_str().expect("utf-8 temp path"),
        "--fraction",
        "0.2",
        "--no-plots",
    ])?;
    let config = cli.into_config()?;

    assert_eq!(config.data.fraction, 0.2);
    assert_eq!(config.probe.epochs, 10);
    assert!(!config.output.plots);
    // Boolean flags can only switch features off, never back on.
    assert!(!config.visualize);
    assert!(config.cpu);
    Ok(())
}

#[test]
fn test_invalid_values_are_rejected() -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(["linprobe", "encoder.safetensors", "--fraction", "0"])?;
    let err = cli.into_config().err().expect("zero fraction rejected");
    assert!(matches!(
        err.downcast_ref::<EvalError>(),
        Some(EvalError::InvalidConfig(_))
    ));

    assert!(Cli::try_parse_from(["linprobe", "encoder.safetensors", "--depths", "nowhere"]).is_err());
    assert!(Cli::try_parse_from(["linprobe"]).is_err());
    Ok(())
}
