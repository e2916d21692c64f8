//! Error types for linear evaluation runs

use std::path::PathBuf;

use thiserror::Error;

use crate::models::{FeatureDepth, Split};

/// Domain errors raised by the evaluation library
#[derive(Error, Debug)]
pub enum EvalError {
    /// A split directory contained no images
    #[error("no images found for {split} split under {root}")]
    EmptySplit {
        /// Which split was being discovered
        split: Split,
        /// Directory that was scanned
        root: PathBuf,
    },

    /// A label that the encoder was not fitted on
    #[error("label '{0}' was not seen while fitting the label encoder")]
    UnknownLabel(String),

    /// A file name that a class label cannot be derived from
    #[error("cannot derive a class label from {0}")]
    BadFileName(PathBuf),

    /// A pipeline step ran before the step producing its input
    #[error("step '{step}' needs {needs}, which no earlier step produced")]
    MissingStage {
        /// Step that failed
        step: String,
        /// Missing product
        needs: String,
    },

    /// Features for a depth were requested but never extracted
    #[error("no features extracted for depth {0}")]
    MissingFeatures(FeatureDepth),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The output directory already holds files
    #[error("output directory is not empty: {0}")]
    OutputNotEmpty(PathBuf),

    /// t-SNE cannot run on the given input
    #[error("t-SNE input error: {0}")]
    Tsne(String),
}

/// Result type alias for library operations that only fail with [`EvalError`]
pub type Result<T> = std::result::Result<T, EvalError>;
