use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use candle::Device;
use rand::SeedableRng;
use rand::rngs::StdRng;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::dataset::LabelEncoder;
use crate::encoder::SimclrEncoder;
use crate::encoder::features::FeatureBank;
use crate::error::EvalError;
use crate::models::{DatasetSplits, FeatureDepth, Split};
use crate::probe::LinearProbe;
use crate::report::{self, DepthReport, EvaluationReport};
use crate::tsne::Embedding;

/// Everything the steps produce, handed from one step to the next
pub struct EvalState {
    pub splits: Option<DatasetSplits>,
    pub labels: Option<LabelEncoder>,
    /// Encoded class index of every sample, per split
    pub targets: HashMap<Split, Vec<u32>>,
    pub encoder: Option<SimclrEncoder>,
    pub features: HashMap<Split, FeatureBank>,
    pub probes: BTreeMap<FeatureDepth, LinearProbe>,
    pub depth_reports: BTreeMap<FeatureDepth, DepthReport>,
    pub embeddings: BTreeMap<FeatureDepth, Embedding>,
    pub report: Option<EvaluationReport>,
    pub started_at: OffsetDateTime,
    pub rng: StdRng,
}

impl EvalState {
    /// Empty state whose random stream is seeded with `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            splits: None,
            labels: None,
            targets: HashMap::new(),
            encoder: None,
            features: HashMap::new(),
            probes: BTreeMap::new(),
            depth_reports: BTreeMap::new(),
            embeddings: BTreeMap::new(),
            report: None,
            started_at: report::now(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn require_splits(&self, step: &str) -> Result<&DatasetSplits, EvalError> {
        self.splits.as_ref().ok_or_else(|| missing(step, "discovered dataset splits"))
    }

    pub fn require_labels(&self, step: &str) -> Result<&LabelEncoder, EvalError> {
        self.labels.as_ref().ok_or_else(|| missing(step, "a fitted label encoder"))
    }

    pub fn require_targets(&self, step: &str, split: Split) -> Result<&[u32], EvalError> {
        self.targets
            .get(&split)
            .map(Vec::as_slice)
            .ok_or_else(|| missing(step, &format!("encoded {} labels", split)))
    }

    pub fn require_encoder(&self, step: &str) -> Result<&SimclrEncoder, EvalError> {
        self.encoder.as_ref().ok_or_else(|| missing(step, "a loaded encoder"))
    }

    pub fn require_features(&self, step: &str, split: Split) -> Result<&FeatureBank, EvalError> {
        self.features
            .get(&split)
            .ok_or_else(|| missing(step, &format!("{} features", split)))
    }

    pub fn require_probe(&self, step: &str, depth: FeatureDepth) -> Result<&LinearProbe, EvalError> {
        self.probes
            .get(&depth)
            .ok_or_else(|| missing(step, &format!("a trained probe for depth {}", depth)))
    }

    pub fn require_depth_report(&mut self, step: &str, depth: FeatureDepth) -> Result<&mut DepthReport, EvalError> {
        self.depth_reports
            .get_mut(&depth)
            .ok_or_else(|| missing(step, &format!("a training history for depth {}", depth)))
    }
}

fn missing(step: &str, needs: &str) -> EvalError {
    EvalError::MissingStage {
        step: step.to_string(),
        needs: needs.to_string(),
    }
}

/// Context available to all pipeline steps
#[derive(Clone)]
pub struct PipelineContext {
    pub verbose: bool,
    /// Where artefacts are written; steps that write files fail without one
    pub output_dir: Option<PathBuf>,
    pub device: Device,
}

impl PipelineContext {
    pub fn require_output_dir(&self, step: &str) -> Result<&Path, EvalError> {
        self.output_dir
            .as_deref()
            .ok_or_else(|| missing(step, "an output directory"))
    }
}

/// Trait that all pipeline steps must implement
pub trait PipelineStep: Send + Sync {
    /// Read what earlier steps produced from `state` and add this step's product
    fn process(&self, state: &mut EvalState, context: &PipelineContext) -> Result<()>;

    /// Human-readable name for this step (used in log output)
    fn name(&self) -> &str;
}

/// Composable pipeline builder
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    context: PipelineContext,
}

impl Pipeline {
    /// Create a new empty pipeline running on the CPU
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            context: PipelineContext {
                verbose: false,
                output_dir: None,
                device: Device::Cpu,
            },
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.context.verbose = verbose;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.context.device = device;
        self
    }

    /// Write artefacts into `output_dir`
    /// The directory must be empty or non-existent
    pub fn with_output_dir(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(EvalError::OutputNotEmpty(output_dir).into());
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.output_dir = Some(output_dir);
        Ok(self)
    }

    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Helper method to add a step from a Box (for convenience)
    pub fn add_step_boxed(mut self, step: Box<dyn PipelineStep>) -> Self {
        self.steps.push(Arc::from(step));
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order
    pub fn run(&self, state: EvalState) -> Result<EvalState> {
        self.run_partial(state, self.steps.len())
    }

    /// Run only the first `num_steps` steps (useful for debugging)
    pub fn run_partial(&self, mut state: EvalState, num_steps: usize) -> Result<EvalState> {
        let total = self.steps.len().min(num_steps);
        for (i, step) in self.steps.iter().take(num_steps).enumerate() {
            let started = Instant::now();
            if self.context.verbose {
                info!("Running step {}/{}: {}", i + 1, total, step.name());
            } else {
                debug!("Running step {}/{}: {}", i + 1, total, step.name());
            }

            step.process(&mut state, &self.context)?;

            debug!(step = step.name(), elapsed_ms = started.elapsed().as_millis() as u64, "step finished");
        }
        Ok(state)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
