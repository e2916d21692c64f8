use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Maps class names to contiguous indices, sorted alphabetically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// Learn the class set from a list of labels
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let classes: BTreeSet<&str> = labels.iter().map(|l| l.as_ref()).collect();
        Self {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Index of a single label
    pub fn encode(&self, label: &str) -> Result<u32, EvalError> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .map(|idx| idx as u32)
            .map_err(|_| EvalError::UnknownLabel(label.to_string()))
    }

    /// Indices for a list of labels; fails on the first label not seen in `fit`
    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<u32>, EvalError> {
        labels.iter().map(|l| self.encode(l.as_ref())).collect()
    }

    /// Class name for an index
    pub fn inverse(&self, index: u32) -> Option<&str> {
        self.classes.get(index as usize).map(String::as_str)
    }
}
