//! Machine-readable summary of a run
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::EvalConfig;
use crate::metrics::{ClassificationReport, ConfusionMatrix};
use crate::models::FeatureDepth;
use crate::probe::History;

/// Test-split metrics of one probe
#[derive(Debug, Clone, Serialize)]
pub struct TestMetrics {
    pub loss: f64,
    pub report: ClassificationReport,
    pub confusion: ConfusionMatrix,
}

/// Everything produced for one feature depth
#[derive(Debug, Clone, Serialize)]
pub struct DepthReport {
    pub depth: FeatureDepth,
    pub feature_dim: usize,
    pub history: History,
    pub test: Option<TestMetrics>,
    pub probe_weights: Option<PathBuf>,
    pub training_plot: Option<PathBuf>,
    pub embedding_plot: Option<PathBuf>,
    pub embedding_kl: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SplitSizes {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub config: EvalConfig,
    pub classes: Vec<String>,
    pub split_sizes: SplitSizes,
    pub depths: Vec<DepthReport>,
}

impl EvaluationReport {
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("Failed to create report {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("Failed to write report {:?}", path))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush report {:?}", path))?;
        Ok(())
    }
}

/// Current time in the local offset, UTC when the offset cannot be determined
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
