//! The linear-evaluation run assembled from pipeline steps
pub mod steps;

use crate::config::EvalConfig;
use crate::models::FeatureDepth;
use crate::pipeline::Pipeline;

use steps::{
    ArchiveOutputsStep, DiscoverSplitsStep, EncodeLabelsStep, EvaluateProbeStep, ExtractFeaturesStep,
    LoadEncoderStep, PlotTrainingStep, TrainProbeStep, VisualizeEmbeddingStep, WriteReportStep,
};

/// File names of per-depth artefacts inside the output directory
pub fn probe_file(depth: FeatureDepth) -> String {
    format!("probe_{}.safetensors", depth)
}

pub fn training_plot_file(depth: FeatureDepth) -> String {
    format!("training_{}.png", depth)
}

pub fn embedding_plot_file(depth: FeatureDepth) -> String {
    format!("tsne_{}.png", depth)
}

pub fn embedding_points_file(depth: FeatureDepth) -> String {
    format!("tsne_{}.json", depth)
}

pub fn classification_file(depth: FeatureDepth) -> String {
    format!("classification_{}.txt", depth)
}

pub const REPORT_FILE: &str = "report.json";

/// Discover, encode, extract, then train / evaluate / plot per depth, embed, report, archive
///
/// The returned pipeline has no output directory or device yet; the caller
/// attaches them with [`Pipeline::with_output_dir`] and [`Pipeline::with_device`].
pub fn build_standard_pipeline(config: &EvalConfig) -> Pipeline {
    let mut pipeline = Pipeline::new()
        .add_step_boxed(Box::new(DiscoverSplitsStep {
            data: config.data.clone(),
        }))
        .add_step_boxed(Box::new(EncodeLabelsStep))
        .add_step_boxed(Box::new(LoadEncoderStep {
            encoder: config.encoder.clone(),
        }))
        .add_step_boxed(Box::new(ExtractFeaturesStep {
            depths: config.depths.clone(),
            image_size: config.data.image_size,
            batch_size: config.encoder.batch_size,
        }));

    for &depth in &config.depths {
        pipeline = pipeline
            .add_step_boxed(Box::new(TrainProbeStep {
                depth,
                params: config.probe.clone(),
                save_weights: config.output.save_probes,
            }))
            .add_step_boxed(Box::new(EvaluateProbeStep { depth }));
        if config.output.plots {
            pipeline = pipeline.add_step_boxed(Box::new(PlotTrainingStep { depth }));
        }
    }

    if config.visualize {
        for &depth in &config.depths {
            pipeline = pipeline.add_step_boxed(Box::new(VisualizeEmbeddingStep {
                depth,
                params: config.tsne.clone(),
                render: config.output.plots,
            }));
        }
    }

    pipeline = pipeline.add_step_boxed(Box::new(WriteReportStep {
        config: config.clone(),
    }));
    if let Some(archive) = &config.output.archive {
        pipeline = pipeline.add_step_boxed(Box::new(ArchiveOutputsStep {
            archive: archive.clone(),
        }));
    }
    pipeline
}
