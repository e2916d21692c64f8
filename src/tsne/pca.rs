use rand::Rng;
use rayon::prelude::*;

const MAX_ITER: usize = 300;
const TOLERANCE: f64 = 1e-10;

fn normalize(v: &mut [f64]) -> f64 {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    norm
}

/// Scores of the leading `k` principal components, one `Vec` per component
///
/// Power iteration on the implicit covariance `Xcᵀ Xc`, deflating against
/// earlier components. Each component's sign is fixed so its largest loading
/// is positive.
pub fn principal_scores<R: Rng>(data: &[f32], dim: usize, k: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let n = data.len() / dim.max(1);
    let mut mean = vec![0.0f64; dim];
    for row in data.chunks(dim) {
        for (m, &x) in mean.iter_mut().zip(row) {
            *m += x as f64;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n.max(1) as f64);

    let centered: Vec<f64> = data
        .chunks(dim)
        .flat_map(|row| row.iter().zip(&mean).map(|(&x, m)| x as f64 - m))
        .collect();
    let row = |i: usize| &centered[i * dim..(i + 1) * dim];

    let mut components: Vec<Vec<f64>> = Vec::with_capacity(k);
    for _ in 0..k {
        let mut v: Vec<f64> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
        normalize(&mut v);

        for _ in 0..MAX_ITER {
            let u: Vec<f64> = (0..n)
                .into_par_iter()
                .map(|i| row(i).iter().zip(&v).map(|(a, b)| a * b).sum())
                .collect();
            let mut next: Vec<f64> = (0..dim)
                .into_par_iter()
                .map(|j| (0..n).map(|i| centered[i * dim + j] * u[i]).sum())
                .collect();
            for c in &components {
                let overlap: f64 = next.iter().zip(c).map(|(a, b)| a * b).sum();
                next.iter_mut().zip(c).for_each(|(a, b)| *a -= overlap * b);
            }
            if normalize(&mut next) == 0.0 {
                break;
            }
            let delta: f64 = next.iter().zip(&v).map(|(a, b)| (a - b).powi(2)).sum();
            v = next;
            if delta < TOLERANCE {
                break;
            }
        }

        let pivot = v
            .iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(0.0);
        if pivot < 0.0 {
            v.iter_mut().for_each(|x| *x = -*x);
        }
        components.push(v);
    }

    components
        .iter()
        .map(|c| {
            (0..n)
                .into_par_iter()
                .map(|i| row(i).iter().zip(c).map(|(a, b)| a * b).sum())
                .collect()
        })
        .collect()
}
