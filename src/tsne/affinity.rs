//! Input-space affinities: perplexity-calibrated Gaussian kernels on k nearest neighbours

use rayon::prelude::*;

const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const SEARCH_STEPS: usize = 100;
const MIN_SUM: f64 = 1e-8;

/// For every row, its `k` nearest other rows as `(index, squared distance)`, nearest first
pub fn nearest_neighbors(data: &[f32], dim: usize, k: usize) -> Vec<Vec<(usize, f64)>> {
    let n = data.len() / dim.max(1);
    let row = |i: usize| &data[i * dim..(i + 1) * dim];
    let norms: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| row(i).iter().map(|&x| x as f64 * x as f64).sum())
        .collect();

    (0..n)
        .into_par_iter()
        .map(|i| {
            let a = row(i);
            let mut dists: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let dot: f64 = a.iter().zip(row(j)).map(|(&x, &y)| x as f64 * y as f64).sum();
                    (j, (norms[i] + norms[j] - 2.0 * dot).max(0.0))
                })
                .collect();
            let k = k.min(dists.len());
            if k > 0 && k < dists.len() {
                dists.select_nth_unstable_by(k - 1, |a, b| a.1.total_cmp(&b.1));
                dists.truncate(k);
            }
            dists.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            dists
        })
        .collect()
}

/// Conditional probabilities `p(j|i)` over one row of squared distances
///
/// Binary-searches the Gaussian precision so the row's entropy equals `ln(perplexity)`.
pub fn conditional_probabilities(distances: &[f64], perplexity: f64) -> Vec<f64> {
    let desired_entropy = perplexity.ln();
    let mut beta = 1.0f64;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut probs = vec![0.0; distances.len()];

    for _ in 0..SEARCH_STEPS {
        for (p, &d) in probs.iter_mut().zip(distances) {
            *p = (-d * beta).exp();
        }
        let mut sum: f64 = probs.iter().sum();
        if sum == 0.0 {
            sum = MIN_SUM;
        }
        let mut weighted = 0.0;
        for (p, &d) in probs.iter_mut().zip(distances) {
            *p /= sum;
            weighted += d * *p;
        }

        let entropy = sum.ln() + beta * weighted;
        let diff = entropy - desired_entropy;
        if diff.abs() <= PERPLEXITY_TOLERANCE {
            break;
        }

        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max == f64::INFINITY { beta * 2.0 } else { (beta + beta_max) / 2.0 };
        } else {
            beta_max = beta;
            beta = if beta_min == f64::NEG_INFINITY { beta / 2.0 } else { (beta + beta_min) / 2.0 };
        }
    }
    probs
}

/// Symmetric joint probabilities in compressed rows; entries sum to 1
#[derive(Debug, Clone)]
pub struct JointProbabilities {
    pub rows: Vec<Vec<(usize, f64)>>,
}

impl JointProbabilities {
    /// Calibrate every neighbourhood and symmetrise as `(P + Pᵀ) / sum`
    pub fn from_neighbors(neighbors: &[Vec<(usize, f64)>], perplexity: f64) -> Self {
        let n = neighbors.len();
        let conditional: Vec<Vec<f64>> = neighbors
            .par_iter()
            .map(|row| {
                let dists: Vec<f64> = row.iter().map(|&(_, d)| d).collect();
                conditional_probabilities(&dists, perplexity)
            })
            .collect();

        let mut triplets: Vec<(usize, usize, f64)> = Vec::with_capacity(4 * n);
        for (i, (row, probs)) in neighbors.iter().zip(&conditional).enumerate() {
            for (&(j, _), &p) in row.iter().zip(probs) {
                triplets.push((i, j, p));
                triplets.push((j, i, p));
            }
        }
        triplets.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        let mut total = 0.0;
        for (i, j, p) in triplets {
            total += p;
            match rows[i].last_mut() {
                Some(last) if last.0 == j => last.1 += p,
                _ => rows[i].push((j, p)),
            }
        }

        let total = total.max(f64::EPSILON);
        for row in rows.iter_mut() {
            for entry in row.iter_mut() {
                entry.1 /= total;
            }
        }
        Self { rows }
    }

    pub fn sum(&self) -> f64 {
        self.rows.iter().flatten().map(|&(_, p)| p).sum()
    }
}
