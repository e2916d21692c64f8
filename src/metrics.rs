//! Classification metrics on test predictions
use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Sorted union of the labels present in either vector
fn observed_labels(y_true: &[u32], y_pred: &[u32]) -> Vec<u32> {
    let labels: BTreeSet<u32> = y_true.iter().chain(y_pred.iter()).copied().collect();
    labels.into_iter().collect()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Rows are true labels, columns predicted labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<u32>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &[u32], y_pred: &[u32]) -> Self {
        let labels = observed_labels(y_true, y_pred);
        let position = |label: u32| labels.binary_search(&label).ok();

        let mut counts = vec![vec![0usize; labels.len()]; labels.len()];
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            if let (Some(row), Some(col)) = (position(t), position(p)) {
                counts[row][col] += 1;
            }
        }
        Self { labels, counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    fn diagonal(&self, i: usize) -> usize {
        self.counts[i][i]
    }

    fn row_sum(&self, i: usize) -> usize {
        self.counts[i].iter().sum()
    }

    fn col_sum(&self, j: usize) -> usize {
        self.counts.iter().map(|row| row[j]).sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        for (i, row) in self.counts.iter().enumerate() {
            let cells: Vec<String> = row.iter().map(|c| format!("{:>width$}", c)).collect();
            let open = if i == 0 { "[[" } else { " [" };
            let close = if i + 1 == self.counts.len() { "]]" } else { "]" };
            writeln!(f, "{}{}{}", open, cells.join(" "), close)?;
        }
        Ok(())
    }
}

/// Precision, recall and F1 for one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: u32,
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Averaged precision, recall and F1
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class and averaged metrics, rendered as a fixed-width table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
}

impl ClassificationReport {
    /// `class_names[i]` names label `i`; labels without a name print as their index
    pub fn from_predictions<S: AsRef<str>>(y_true: &[u32], y_pred: &[u32], class_names: &[S]) -> Self {
        let cm = ConfusionMatrix::from_predictions(y_true, y_pred);

        let classes: Vec<ClassMetrics> = cm
            .labels
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let tp = cm.diagonal(i);
                let precision = ratio(tp, cm.col_sum(i));
                let recall = ratio(tp, cm.row_sum(i));
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                let name = class_names
                    .get(label as usize)
                    .map(|n| n.as_ref().to_string())
                    .unwrap_or_else(|| label.to_string());
                ClassMetrics {
                    label,
                    name,
                    precision,
                    recall,
                    f1,
                    support: cm.row_sum(i),
                }
            })
            .collect();

        let total = cm.total();
        let correct: usize = (0..cm.labels.len()).map(|i| cm.diagonal(i)).sum();

        let n = classes.len().max(1) as f64;
        let macro_avg = AveragedMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
            support: total,
        };

        let weight = |c: &ClassMetrics| c.support as f64 / total.max(1) as f64;
        let weighted_avg = AveragedMetrics {
            precision: classes.iter().map(|c| c.precision * weight(c)).sum(),
            recall: classes.iter().map(|c| c.recall * weight(c)).sum(),
            f1: classes.iter().map(|c| c.f1 * weight(c)).sum(),
            support: total,
        };

        Self {
            classes,
            accuracy: ratio(correct, total),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = 2;
        let width = self
            .classes
            .iter()
            .map(|c| c.name.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(0);

        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$}  {:>9.digits$} {:>9.digits$} {:>9.digits$} {:>9}",
                c.name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9.digits$} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$}  {:>9.digits$} {:>9.digits$} {:>9.digits$} {:>9}",
                name, avg.precision, avg.recall, avg.f1, avg.support
            )?;
        }
        Ok(())
    }
}
