pub mod archive;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod encoder;
pub mod error;
pub mod evaluation;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod plot;
pub mod probe;
pub mod report;
pub mod tsne;

pub use config::EvalConfig;
pub use error::EvalError;
pub use evaluation::build_standard_pipeline;
pub use models::{FeatureDepth, Sample, Split};
pub use pipeline::{EvalState, Pipeline, PipelineContext, PipelineStep};
