//! t-SNE embedding of feature vectors into two dimensions.
//!
//! Input affinities are computed on the `3 · perplexity` nearest neighbours of
//! each point, while the repulsive forces of the Student-t kernel are summed
//! exactly over all pairs. Optimisation follows the usual schedule: an
//! exploration stage with exaggerated affinities and low momentum, then plain
//! gradient descent with momentum and per-coordinate adaptive gains.
pub mod affinity;
pub mod pca;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EvalError;

pub use affinity::JointProbabilities;

const EXPLORATION_ITER: usize = 250;
const CHECK_EVERY: usize = 50;
const ITER_WITHOUT_PROGRESS: usize = 300;
const MIN_GRAD_NORM: f64 = 1e-7;
const MIN_GAIN: f64 = 0.01;
const INIT_SCALE: f64 = 1e-4;

/// How the low-dimensional points start out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TsneInit {
    Pca,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneParams {
    pub perplexity: f64,
    pub early_exaggeration: f64,
    /// `None` picks `max(N / early_exaggeration / 4, 50)`
    pub learning_rate: Option<f64>,
    pub max_iter: usize,
    pub init: TsneInit,
    /// Embed a random subset of at most this many points
    pub max_points: Option<usize>,
}

impl Default for TsneParams {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            early_exaggeration: 12.0,
            learning_rate: None,
            max_iter: 1000,
            init: TsneInit::Pca,
            max_points: None,
        }
    }
}

/// Result of a t-SNE run
#[derive(Debug, Clone)]
pub struct Embedding {
    pub points: Vec<[f32; 2]>,
    pub kl_divergence: f64,
    pub iterations: usize,
}

/// Indices of a random subset of at most `max` of `n` points, in ascending order
pub fn subsample_indices<R: Rng>(n: usize, max: Option<usize>, rng: &mut R) -> Vec<usize> {
    match max {
        Some(max) if max < n => {
            let mut idx = rand::seq::index::sample(rng, n, max).into_vec();
            idx.sort_unstable();
            idx
        }
        _ => (0..n).collect(),
    }
}

struct Optimizer {
    y: Vec<[f64; 2]>,
    update: Vec<[f64; 2]>,
    gains: Vec<[f64; 2]>,
    learning_rate: f64,
}

struct Stage {
    momentum: f64,
    exaggeration: f64,
    start: usize,
    end: usize,
    without_progress: usize,
}

impl Optimizer {
    /// Gradient of KL(P‖Q) and optionally the divergence itself
    fn gradient(&self, p: &JointProbabilities, exaggeration: f64, with_error: bool) -> (Vec<[f64; 2]>, f64) {
        let y = &self.y;
        let n = y.len();

        // Per point: attraction, unnormalised repulsion and its share of Z.
        let partial: Vec<([f64; 2], [f64; 2], f64)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let yi = y[i];
                let mut rep = [0.0; 2];
                let mut z = 0.0;
                for (j, yj) in y.iter().enumerate() {
                    if j == i {
                        continue;
                    }
                    let dx = yi[0] - yj[0];
                    let dy = yi[1] - yj[1];
                    let w = 1.0 / (1.0 + dx * dx + dy * dy);
                    z += w;
                    rep[0] += w * w * dx;
                    rep[1] += w * w * dy;
                }
                let mut attr = [0.0; 2];
                for &(j, pij) in &p.rows[i] {
                    let dx = yi[0] - y[j][0];
                    let dy = yi[1] - y[j][1];
                    let w = 1.0 / (1.0 + dx * dx + dy * dy);
                    attr[0] += pij * exaggeration * w * dx;
                    attr[1] += pij * exaggeration * w * dy;
                }
                (attr, rep, z)
            })
            .collect();

        let z: f64 = partial.iter().map(|(_, _, z)| z).sum::<f64>().max(f64::EPSILON);
        let grad = partial
            .iter()
            .map(|(attr, rep, _)| {
                [4.0 * (attr[0] - rep[0] / z), 4.0 * (attr[1] - rep[1] / z)]
            })
            .collect();

        let error = if with_error {
            (0..n)
                .into_par_iter()
                .map(|i| {
                    p.rows[i]
                        .iter()
                        .map(|&(j, pij)| {
                            let pij = pij * exaggeration;
                            let dx = y[i][0] - y[j][0];
                            let dy = y[i][1] - y[j][1];
                            let q = (1.0 / (1.0 + dx * dx + dy * dy)) / z;
                            pij * (pij.max(f64::EPSILON) / q.max(f64::EPSILON)).ln()
                        })
                        .sum::<f64>()
                })
                .sum()
        } else {
            0.0
        };
        (grad, error)
    }

    /// Run one stage; returns the last iteration index and the last known error
    fn run(&mut self, p: &JointProbabilities, stage: &Stage) -> (usize, f64) {
        let mut best_error = f64::INFINITY;
        let mut best_iter = stage.start;
        let mut error = f64::NAN;
        let mut last = stage.start;

        for i in stage.start..stage.end {
            last = i;
            let check = (i + 1) % CHECK_EVERY == 0;
            let (mut grad, err) = self.gradient(p, stage.exaggeration, check || i + 1 == stage.end);
            if check || i + 1 == stage.end {
                error = err;
            }

            let mut grad_norm = 0.0;
            for ((g, u), gain) in grad.iter_mut().zip(self.update.iter_mut()).zip(self.gains.iter_mut()) {
                for d in 0..2 {
                    if u[d] * g[d] < 0.0 {
                        gain[d] += 0.2;
                    } else {
                        gain[d] *= 0.8;
                    }
                    gain[d] = gain[d].max(MIN_GAIN);
                    g[d] *= gain[d];
                    grad_norm += g[d] * g[d];
                    u[d] = stage.momentum * u[d] - self.learning_rate * g[d];
                }
            }
            for (y, u) in self.y.iter_mut().zip(&self.update) {
                y[0] += u[0];
                y[1] += u[1];
            }

            if check {
                debug!(iteration = i + 1, kl = error, grad_norm = grad_norm.sqrt(), "t-SNE progress");
                if error < best_error {
                    best_error = error;
                    best_iter = i;
                } else if i - best_iter > stage.without_progress {
                    break;
                }
                if grad_norm.sqrt() <= MIN_GRAD_NORM {
                    break;
                }
            }
        }
        (last, error)
    }
}

fn initial_points<R: Rng>(
    data: &[f32],
    dim: usize,
    n: usize,
    init: TsneInit,
    rng: &mut R,
) -> Result<Vec<[f64; 2]>, EvalError> {
    if init == TsneInit::Pca {
        let scores = pca::principal_scores(data, dim, 2, rng);
        let first = &scores[0];
        let mean = first.iter().sum::<f64>() / n as f64;
        let std = (first.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        if std > 0.0 && std.is_finite() {
            return Ok((0..n)
                .map(|i| [scores[0][i] / std * INIT_SCALE, scores[1][i] / std * INIT_SCALE])
                .collect());
        }
        debug!("degenerate PCA initialisation, falling back to random");
    }

    let normal = Normal::new(0.0, INIT_SCALE).map_err(|e| EvalError::Tsne(e.to_string()))?;
    Ok((0..n)
        .map(|_| [normal.sample(rng), normal.sample(rng)])
        .collect())
}

/// Embed `n = data.len() / dim` row-major feature vectors into the plane
pub fn fit<R: Rng>(data: &[f32], dim: usize, params: &TsneParams, rng: &mut R) -> Result<Embedding, EvalError> {
    if dim == 0 || data.len() % dim != 0 {
        return Err(EvalError::Tsne(format!(
            "{} values cannot be split into rows of width {}",
            data.len(),
            dim
        )));
    }
    let n = data.len() / dim;
    if n < 2 {
        return Err(EvalError::Tsne(format!("need at least 2 points, got {}", n)));
    }
    if params.perplexity >= n as f64 {
        return Err(EvalError::Tsne(format!(
            "perplexity ({}) must be less than the number of points ({})",
            params.perplexity, n
        )));
    }
    if data.iter().any(|x| !x.is_finite()) {
        return Err(EvalError::Tsne("input contains non-finite values".to_string()));
    }

    let k = (n - 1).min((3.0 * params.perplexity + 1.0) as usize);
    let neighbors = affinity::nearest_neighbors(data, dim, k);
    let p = JointProbabilities::from_neighbors(&neighbors, params.perplexity);

    let learning_rate = params
        .learning_rate
        .unwrap_or_else(|| (n as f64 / params.early_exaggeration / 4.0).max(50.0));

    let mut opt = Optimizer {
        y: initial_points(data, dim, n, params.init, rng)?,
        update: vec![[0.0; 2]; n],
        gains: vec![[1.0; 2]; n],
        learning_rate,
    };

    let exploration_end = EXPLORATION_ITER.min(params.max_iter);
    let (mut last, mut kl) = opt.run(
        &p,
        &Stage {
            momentum: 0.5,
            exaggeration: params.early_exaggeration,
            start: 0,
            end: exploration_end,
            without_progress: EXPLORATION_ITER,
        },
    );
    if params.max_iter > exploration_end {
        (last, kl) = opt.run(
            &p,
            &Stage {
                momentum: 0.8,
                exaggeration: 1.0,
                start: exploration_end,
                end: params.max_iter,
                without_progress: ITER_WITHOUT_PROGRESS,
            },
        );
    }

    Ok(Embedding {
        points: opt.y.iter().map(|p| [p[0] as f32, p[1] as f32]).collect(),
        kl_divergence: kl,
        iterations: if params.max_iter == 0 { 0 } else { last + 1 },
    })
}
