use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use candle::{DType, Tensor};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::archive;
use crate::config::{DataConfig, EvalConfig};
use crate::dataset::{self, LabelEncoder};
use crate::encoder::{self, EncoderConfig, SimclrEncoder};
use crate::error::EvalError;
use crate::metrics::{ClassificationReport, ConfusionMatrix};
use crate::models::{FeatureDepth, Split};
use crate::pipeline::{EvalState, PipelineContext, PipelineStep};
use crate::plot;
use crate::probe::{LinearProbe, ProbeParams};
use crate::report::{self, DepthReport, EvaluationReport, SplitSizes, TestMetrics};
use crate::tsne::{self, TsneParams};

use super::{
    REPORT_FILE, classification_file, embedding_plot_file, embedding_points_file, probe_file,
    training_plot_file,
};

const SPLITS: [Split; 3] = [Split::Train, Split::Validation, Split::Test];

/// Find the images of every split and sub-sample the training split
pub struct DiscoverSplitsStep {
    pub data: DataConfig,
}

impl PipelineStep for DiscoverSplitsStep {
    fn process(&self, state: &mut EvalState, _context: &PipelineContext) -> Result<()> {
        let splits = dataset::discover_splits(&self.data, &mut state.rng)?;
        state.splits = Some(splits);
        Ok(())
    }

    fn name(&self) -> &str {
        "Discover Splits"
    }
}

/// Fit class indices on the training labels and encode every split
pub struct EncodeLabelsStep;

impl PipelineStep for EncodeLabelsStep {
    fn process(&self, state: &mut EvalState, _context: &PipelineContext) -> Result<()> {
        let splits = state.require_splits(self.name())?;
        let train_labels: Vec<&str> = splits.train.iter().map(|s| s.label.as_str()).collect();
        let encoder = LabelEncoder::fit(&train_labels);

        let mut targets = Vec::with_capacity(SPLITS.len());
        for split in SPLITS {
            let labels: Vec<&str> = splits.get(split).iter().map(|s| s.label.as_str()).collect();
            let encoded = encoder
                .transform(&labels)
                .with_context(|| format!("Failed to encode {} labels", split))?;
            targets.push((split, encoded));
        }

        info!(classes = ?encoder.classes(), "labels encoded");
        state.targets.extend(targets);
        state.labels = Some(encoder);
        Ok(())
    }

    fn name(&self) -> &str {
        "Encode Labels"
    }
}

/// Load the frozen encoder from its checkpoint
pub struct LoadEncoderStep {
    pub encoder: EncoderConfig,
}

impl PipelineStep for LoadEncoderStep {
    fn process(&self, state: &mut EvalState, context: &PipelineContext) -> Result<()> {
        let encoder = SimclrEncoder::load(&self.encoder.checkpoint, &self.encoder, &context.device)?;
        state.encoder = Some(encoder);
        Ok(())
    }

    fn name(&self) -> &str {
        "Load Encoder"
    }
}

/// Run every split through the encoder once, keeping the requested taps
pub struct ExtractFeaturesStep {
    pub depths: Vec<FeatureDepth>,
    pub image_size: usize,
    pub batch_size: usize,
}

impl PipelineStep for ExtractFeaturesStep {
    fn process(&self, state: &mut EvalState, context: &PipelineContext) -> Result<()> {
        let splits = state.require_splits(self.name())?;
        let model = state.require_encoder(self.name())?;

        let mut banks = Vec::with_capacity(SPLITS.len());
        for split in SPLITS {
            let bank = encoder::extract_features(
                model,
                splits.get(split),
                &self.depths,
                self.image_size,
                self.batch_size,
                &context.device,
                split.name(),
            )?;
            banks.push((split, bank));
        }

        state.features.extend(banks);
        Ok(())
    }

    fn name(&self) -> &str {
        "Extract Features"
    }
}

/// Fit a linear probe on the training features of one depth
pub struct TrainProbeStep {
    pub depth: FeatureDepth,
    pub params: ProbeParams,
    /// Save the trained weights into the output directory, when there is one
    pub save_weights: bool,
}

impl PipelineStep for TrainProbeStep {
    fn process(&self, state: &mut EvalState, context: &PipelineContext) -> Result<()> {
        let name = self.name();
        let train_x = state.require_features(name, Split::Train)?.get(self.depth)?.clone();
        let val_x = state.require_features(name, Split::Validation)?.get(self.depth)?.clone();
        let train_y = state.require_targets(name, Split::Train)?.to_vec();
        let val_y = state.require_targets(name, Split::Validation)?.to_vec();
        let num_classes = state.require_labels(name)?.num_classes();
        let in_dim = train_x.dim(1)?;

        info!(depth = %self.depth, in_dim, num_classes, train = train_y.len(), "training linear probe");
        let mut probe = LinearProbe::new(in_dim, num_classes, &context.device, &mut state.rng)?;
        let history = probe.fit(&train_x, &train_y, &val_x, &val_y, &self.params, &mut state.rng)?;

        if let Some(best) = history.best() {
            info!(
                depth = %self.depth,
                epochs = history.epochs.len(),
                best_epoch = best.epoch,
                val_loss = best.val_loss,
                val_accuracy = best.val_accuracy,
                "probe trained"
            );
        }

        let probe_weights = match (&context.output_dir, self.save_weights) {
            (Some(dir), true) => {
                let path = dir.join(probe_file(self.depth));
                probe.save(&path)?;
                Some(path)
            }
            _ => None,
        };

        state.depth_reports.insert(
            self.depth,
            DepthReport {
                depth: self.depth,
                feature_dim: in_dim,
                history,
                test: None,
                probe_weights,
                training_plot: None,
                embedding_plot: None,
                embedding_kl: None,
            },
        );
        state.probes.insert(self.depth, probe);
        Ok(())
    }

    fn name(&self) -> &str {
        "Train Probe"
    }
}

/// Score a trained probe on the test split
pub struct EvaluateProbeStep {
    pub depth: FeatureDepth,
}

impl PipelineStep for EvaluateProbeStep {
    fn process(&self, state: &mut EvalState, context: &PipelineContext) -> Result<()> {
        let name = self.name();
        let probe = state.require_probe(name, self.depth)?;
        let test_x = state.require_features(name, Split::Test)?.get(self.depth)?;
        let test_y = state.require_targets(name, Split::Test)?;
        let classes = state.require_labels(name)?.classes();

        let y_pred = probe.predict(test_x)?;
        let (loss, accuracy) = probe.evaluate(test_x, test_y)?;
        let report = ClassificationReport::from_predictions(test_y, &y_pred, classes);
        let confusion = ConfusionMatrix::from_predictions(test_y, &y_pred);
        info!(depth = %self.depth, loss, accuracy, "probe evaluated on test split");

        if let Some(dir) = &context.output_dir {
            let path = dir.join(classification_file(self.depth));
            let text = format!("{}\nConfusion matrix:\n{}\n", report, confusion);
            std::fs::write(&path, text).with_context(|| format!("Failed to write {:?}", path))?;
        }

        let entry = state.require_depth_report(name, self.depth)?;
        entry.test = Some(TestMetrics {
            loss,
            report,
            confusion,
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "Evaluate Probe"
    }
}

/// Draw the loss and accuracy curves of one probe
pub struct PlotTrainingStep {
    pub depth: FeatureDepth,
}

impl PipelineStep for PlotTrainingStep {
    fn process(&self, state: &mut EvalState, context: &PipelineContext) -> Result<()> {
        let name = self.name();
        let dir = context.require_output_dir(name)?;
        let entry = state.require_depth_report(name, self.depth)?;

        let path = dir.join(training_plot_file(self.depth));
        let title = format!("Linear probe training, {}", self.depth.description());
        plot::plot_training(&entry.history, &title, &path)
            .with_context(|| format!("Failed to plot {:?}", path))?;

        entry.training_plot = Some(path);
        Ok(())
    }

    fn name(&self) -> &str {
        "Plot Training"
    }
}

#[derive(Serialize)]
struct EmbeddingFile<'a> {
    depth: FeatureDepth,
    kl_divergence: f64,
    iterations: usize,
    classes: &'a [String],
    labels: &'a [u32],
    points: &'a [[f32; 2]],
}

/// t-SNE of the training features of one depth
pub struct VisualizeEmbeddingStep {
    pub depth: FeatureDepth,
    pub params: TsneParams,
    /// Draw the scatter plot; the coordinates are written either way
    pub render: bool,
}

impl PipelineStep for VisualizeEmbeddingStep {
    fn process(&self, state: &mut EvalState, context: &PipelineContext) -> Result<()> {
        let name = self.name();
        let features = state.require_features(name, Split::Train)?.get(self.depth)?.clone();
        let targets = state.require_targets(name, Split::Train)?.to_vec();
        let classes = state.require_labels(name)?.classes().to_vec();

        let indices = tsne::subsample_indices(targets.len(), self.params.max_points, &mut state.rng);
        let rows = if indices.len() < targets.len() {
            let ids: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
            let ids = Tensor::from_vec(ids, indices.len(), features.device())?;
            features.index_select(&ids, 0)?
        } else {
            features
        };
        let dim = rows.dim(1)?;
        let data = rows.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let labels: Vec<u32> = indices.iter().map(|&i| targets[i]).collect();

        let mut params = self.params.clone();
        let max_perplexity = labels.len().saturating_sub(1) as f64;
        if params.perplexity >= labels.len() as f64 && max_perplexity > 0.0 {
            warn!(
                depth = %self.depth,
                requested = params.perplexity,
                used = max_perplexity,
                "perplexity exceeds the number of points, lowering it"
            );
            params.perplexity = max_perplexity;
        }

        info!(depth = %self.depth, points = labels.len(), dim, "running t-SNE");
        let embedding = tsne::fit(&data, dim, &params, &mut state.rng)?;
        info!(
            depth = %self.depth,
            kl_divergence = embedding.kl_divergence,
            iterations = embedding.iterations,
            "t-SNE finished"
        );

        let mut plot_path = None;
        if let Some(dir) = &context.output_dir {
            let path = dir.join(embedding_points_file(self.depth));
            let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(
                &mut writer,
                &EmbeddingFile {
                    depth: self.depth,
                    kl_divergence: embedding.kl_divergence,
                    iterations: embedding.iterations,
                    classes: &classes,
                    labels: &labels,
                    points: &embedding.points,
                },
            )?;
            writer
                .flush()
                .with_context(|| format!("Failed to write {:?}", path))?;

            if self.render {
                let path = dir.join(embedding_plot_file(self.depth));
                let title = format!("t-SNE of training features, {}", self.depth.description());
                plot::plot_embedding(&embedding.points, &labels, &classes, &title, &path)
                    .with_context(|| format!("Failed to plot {:?}", path))?;
                plot_path = Some(path);
            }
        } else if self.render {
            return Err(EvalError::MissingStage {
                step: name.to_string(),
                needs: "an output directory".to_string(),
            }
            .into());
        }

        if let Some(entry) = state.depth_reports.get_mut(&self.depth) {
            entry.embedding_kl = Some(embedding.kl_divergence);
            entry.embedding_plot = plot_path;
        }
        state.embeddings.insert(self.depth, embedding);
        Ok(())
    }

    fn name(&self) -> &str {
        "Visualize Embedding"
    }
}

/// Write `report.json` with the outcome of every depth
pub struct WriteReportStep {
    pub config: EvalConfig,
}

impl PipelineStep for WriteReportStep {
    fn process(&self, state: &mut EvalState, context: &PipelineContext) -> Result<()> {
        let name = self.name();
        let dir = context.require_output_dir(name)?;
        let splits = state.require_splits(name)?;
        let classes = state.require_labels(name)?.classes().to_vec();

        let report = EvaluationReport {
            run_id: Uuid::new_v4(),
            started_at: state.started_at,
            finished_at: report::now(),
            config: self.config.clone(),
            classes,
            split_sizes: SplitSizes {
                train: splits.train.len(),
                validation: splits.validation.len(),
                test: splits.test.len(),
            },
            depths: state.depth_reports.values().cloned().collect(),
        };

        let path = dir.join(REPORT_FILE);
        report.write_json(&path)?;
        info!(path = %path.display(), run_id = %report.run_id, "report written");
        state.report = Some(report);
        Ok(())
    }

    fn name(&self) -> &str {
        "Write Report"
    }
}

/// Bundle the output directory into a tar.zst file
pub struct ArchiveOutputsStep {
    pub archive: PathBuf,
}

impl PipelineStep for ArchiveOutputsStep {
    fn process(&self, _state: &mut EvalState, context: &PipelineContext) -> Result<()> {
        let dir = context.require_output_dir(self.name())?;
        if std::path::absolute(&self.archive)?.starts_with(std::path::absolute(dir)?) {
            return Err(EvalError::InvalidConfig(format!(
                "archive {} must not be inside the output directory {}",
                self.archive.display(),
                dir.display()
            ))
            .into());
        }

        archive::pack_dir(dir, &self.archive)?;
        info!(archive = %self.archive.display(), "outputs archived");
        Ok(())
    }

    fn name(&self) -> &str {
        "Archive Outputs"
    }
}
