mod common;

use std::fs::File;
use std::path::PathBuf;

use linprobe::evaluation::steps::{ArchiveOutputsStep, EvaluateProbeStep, WriteReportStep};
use linprobe::evaluation::{self, REPORT_FILE};
use linprobe::{EvalConfig, EvalError, EvalState, FeatureDepth, Pipeline, build_standard_pipeline};

fn archive_entries(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let decoder = zstd::stream::read::Decoder::new(File::open(path)?)?;
    let mut archive = tar::Archive::new(decoder);
    let mut names = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        names.push(entry.path()?.to_string_lossy().trim_start_matches("./").to_string());
    }
    Ok(names)
}

#[test]
fn test_standard_pipeline_end_to_end() -> anyhow::Result<()> {
    let data = common::create_test_dataset(6, 3, 3);
    let work = tempfile::TempDir::new()?;
    let checkpoint = work.path().join("encoder.safetensors");
    common::write_tiny_encoder(&checkpoint)?;
    let output = work.path().join("out");
    let archive = work.path().join("run.tar.zst");

    let mut config = common::quick_config(&data, checkpoint, output.clone());
    config.output.archive = Some(archive.clone());
    config.validate()?;

    let pipeline = build_standard_pipeline(&config).with_output_dir(output.clone())?;
    let state = pipeline.run(EvalState::new(config.seed))?;

    let splits = state.splits.as_ref().expect("splits discovered");
    assert_eq!(splits.train.len(), 24);
    assert_eq!(splits.validation.len(), 12);
    assert_eq!(splits.test.len(), 12);
    assert_eq!(state.labels.as_ref().map(|l| l.num_classes()), Some(4));

    let report = state.report.as_ref().expect("report written");
    assert_eq!(report.classes, vec!["CNV", "DME", "DRUSEN", "NORMAL"]);
    assert_eq!(report.depths.len(), 3);
    for depth in &report.depths {
        let test = depth.test.as_ref().expect("test metrics");
        assert_eq!(test.confusion.total(), 12);
        assert!((0.0..=1.0).contains(&test.report.accuracy));
        assert!(!depth.history.epochs.is_empty());
        assert!(depth.embedding_kl.is_some());
        assert!(depth.embedding_plot.is_none());
        assert!(depth.training_plot.is_none());
    }
    assert_eq!(report.depths[0].depth, FeatureDepth::Projection2);
    assert_eq!(report.depths[0].feature_dim, 8);
    assert_eq!(report.depths[2].feature_dim, 512);

    for depth in &config.depths {
        assert!(output.join(evaluation::probe_file(*depth)).is_file());
        assert!(output.join(evaluation::classification_file(*depth)).is_file());
        assert!(output.join(evaluation::embedding_points_file(*depth)).is_file());
        assert!(!output.join(evaluation::embedding_plot_file(*depth)).exists());
        assert_eq!(state.embeddings[depth].points.len(), 24);
    }

    let json: serde_json::Value = serde_json::from_reader(File::open(output.join(REPORT_FILE))?)?;
    assert_eq!(json["classes"].as_array().map(|a| a.len()), Some(4));
    assert_eq!(json["split_sizes"]["train"], 24);
    assert_eq!(json["depths"][1]["depth"], "projection1");
    assert!(json["started_at"].as_str().is_some());
    assert!(json["depths"][0]["test"]["confusion"]["counts"].is_array());

    let text = std::fs::read_to_string(output.join(evaluation::classification_file(FeatureDepth::Backbone)))?;
    assert!(text.contains("precision"));
    assert!(text.contains("Confusion matrix:"));

    let entries = archive_entries(&archive)?;
    assert!(entries.iter().any(|e| e == REPORT_FILE));
    assert!(entries.iter().any(|e| e == "probe_backbone.safetensors"));
    Ok(())
}

#[test]
fn test_standard_pipeline_step_order() {
    let mut config = EvalConfig::default();
    config.output.plots = false;
    config.depths = vec![FeatureDepth::Output, FeatureDepth::Backbone];
    let names = build_standard_pipeline(&config).step_names().join(" > ");
    assert_eq!(
        names,
        "Discover Splits > Encode Labels > Load Encoder > Extract Features > \
         Train Probe > Evaluate Probe > Train Probe > Evaluate Probe > \
         Visualize Embedding > Visualize Embedding > Write Report"
    );

    config.output.plots = true;
    config.visualize = false;
    config.output.archive = Some("run.tar.zst".into());
    let pipeline = build_standard_pipeline(&config);
    let names = pipeline.step_names();
    assert_eq!(names.len(), 4 + 2 * 3 + 2);
    assert_eq!(names[6], "Plot Training");
    assert_eq!(names.last().copied(), Some("Archive Outputs"));
}

#[test]
fn test_missing_stage_is_reported() -> anyhow::Result<()> {
    let pipeline = Pipeline::new().add_step_boxed(Box::new(EvaluateProbeStep {
        depth: FeatureDepth::Backbone,
    }));
    let err = match pipeline.run(EvalState::new(0)) {
        Ok(_) => panic!("evaluation without a probe must fail"),
        Err(e) => e,
    };
    match err.downcast_ref::<EvalError>() {
        Some(EvalError::MissingStage { step, needs }) => {
            assert_eq!(step, "Evaluate Probe");
            assert!(needs.contains("backbone"));
        }
        other => panic!("expected MissingStage, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_report_needs_output_dir() {
    let pipeline = Pipeline::new().add_step_boxed(Box::new(WriteReportStep {
        config: EvalConfig::default(),
    }));
    let err = pipeline.run(EvalState::new(0)).err().expect("no output directory");
    assert!(matches!(
        err.downcast_ref::<EvalError>(),
        Some(EvalError::MissingStage { .. })
    ));
}

#[test]
fn test_output_dir_must_be_empty() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    std::fs::write(dir.path().join("old.txt"), b"left over")?;

    let err = Pipeline::new()
        .with_output_dir(dir.path().to_path_buf())
        .err()
        .expect("non-empty directory rejected");
    assert!(matches!(
        err.downcast_ref::<EvalError>(),
        Some(EvalError::OutputNotEmpty(_))
    ));

    // A missing directory is created.
    let fresh = dir.path().join("nested").join("out");
    let pipeline = Pipeline::new().with_output_dir(fresh.clone())?;
    assert!(fresh.is_dir());
    assert_eq!(pipeline.context().output_dir.as_deref(), Some(fresh.as_path()));
    Ok(())
}

#[test]
fn test_run_partial_stops_early() -> anyhow::Result<()> {
    let data = common::create_test_dataset(2, 1, 1);
    let work = tempfile::TempDir::new()?;
    let config = common::quick_config(&data, work.path().join("missing.safetensors"), work.path().join("out"));

    // The encoder checkpoint does not exist, so a full run would fail at step 3.
    let pipeline = build_standard_pipeline(&config);
    let state = pipeline.run_partial(EvalState::new(config.seed), 2)?;
    assert!(state.splits.is_some());
    assert_eq!(state.targets.len(), 3);
    assert!(state.encoder.is_none());

    assert!(pipeline.run(EvalState::new(config.seed)).is_err());
    Ok(())
}

#[test]
fn test_archive_inside_output_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let output = dir.path().join("out");
    let pipeline = Pipeline::new()
        .with_output_dir(output.clone())?
        .add_step_boxed(Box::new(ArchiveOutputsStep {
            archive: output.join("self.tar.zst"),
        }));
    let err = pipeline.run(EvalState::new(0)).err().expect("archive inside output");
    assert!(matches!(
        err.downcast_ref::<EvalError>(),
        Some(EvalError::InvalidConfig(_))
    ));
    Ok(())
}

#[test]
fn test_pipeline_renders_plots() -> anyhow::Result<()> {
    let data = common::create_test_dataset(6, 3, 3);
    let work = tempfile::TempDir::new()?;
    let checkpoint = work.path().join("encoder.safetensors");
    common::write_tiny_encoder(&checkpoint)?;
    let output = work.path().join("out");

    let mut config = common::quick_config(&data, checkpoint, output.clone());
    config.output.plots = true;
    config.depths = vec![FeatureDepth::Output];

    let names = build_standard_pipeline(&config).step_names().join(" > ");
    assert!(names.contains("Plot Training"));

    let pipeline = build_standard_pipeline(&config).with_output_dir(output.clone())?;
    let state = pipeline.run(EvalState::new(config.seed))?;

    let report = state.report.as_ref().expect("report written");
    let depth = &report.depths[0];
    let training = depth.training_plot.as_ref().expect("training plot");
    let embedding = depth.embedding_plot.as_ref().expect("embedding plot");
    assert_eq!(training, &output.join(evaluation::training_plot_file(FeatureDepth::Output)));
    assert_eq!(embedding, &output.join(evaluation::embedding_plot_file(FeatureDepth::Output)));
    assert!(training.is_file());
    assert_eq!(image::image_dimensions(embedding)?, (1000, 1000));
    Ok(())
}
