use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Dataset partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "validation",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One labelled image on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: String,
}

/// The three splits used by a linear evaluation run
#[derive(Debug, Clone, Default)]
pub struct DatasetSplits {
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
    pub test: Vec<Sample>,
}

impl DatasetSplits {
    pub fn get(&self, split: Split) -> &[Sample] {
        match split {
            Split::Train => &self.train,
            Split::Validation => &self.validation,
            Split::Test => &self.test,
        }
    }
}

/// Point in the frozen encoder where features are tapped
///
/// Ordered from the deepest projection back to the trunk, which is also the
/// order the standard run evaluates them in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FeatureDepth {
    /// Final projection output, no non-linearity
    Output,
    /// ReLU after the second dense layer of the head
    Projection2,
    /// ReLU after the first dense layer of the head
    Projection1,
    /// Pooled trunk output, no projection at all
    Backbone,
}

impl FeatureDepth {
    pub const ALL: [FeatureDepth; 4] = [
        FeatureDepth::Output,
        FeatureDepth::Projection2,
        FeatureDepth::Projection1,
        FeatureDepth::Backbone,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureDepth::Output => "output",
            FeatureDepth::Projection2 => "projection2",
            FeatureDepth::Projection1 => "projection1",
            FeatureDepth::Backbone => "backbone",
        }
    }

    /// Human-readable description used in plot titles
    pub fn description(&self) -> &'static str {
        match self {
            FeatureDepth::Output => "projection output",
            FeatureDepth::Projection2 => "last ReLU of the projection head",
            FeatureDepth::Projection1 => "first ReLU of the projection head",
            FeatureDepth::Backbone => "no projection",
        }
    }
}

impl fmt::Display for FeatureDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
