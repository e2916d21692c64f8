mod common;

use linprobe::EvalError;
use linprobe::tsne::{self, JointProbabilities, TsneInit, TsneParams, affinity};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn centroid(points: &[[f32; 2]]) -> [f32; 2] {
    let n = points.len() as f32;
    let sum = points
        .iter()
        .fold([0.0, 0.0], |acc, p| [acc[0] + p[0], acc[1] + p[1]]);
    [sum[0] / n, sum[1] / n]
}

fn dist(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

#[test]
fn test_conditional_probabilities_match_perplexity() {
    let distances: Vec<f64> = (1..=20).map(|d| d as f64 * 0.5).collect();
    let probs = affinity::conditional_probabilities(&distances, 5.0);

    let sum: f64 = probs.iter().sum();
    assert!((sum - 1.0).abs() < 1e-9);
    let entropy: f64 = -probs.iter().filter(|&&p| p > 0.0).map(|p| p * p.ln()).sum::<f64>();
    assert!((entropy.exp() - 5.0).abs() < 1e-3, "perplexity {}", entropy.exp());
    // Closer neighbours get more mass.
    assert!(probs.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn test_nearest_neighbors_sorted() {
    let data = [0.0f32, 0.0, 1.0, 0.0, 3.0, 0.0, 10.0, 0.0];
    let neighbors = affinity::nearest_neighbors(&data, 2, 2);
    assert_eq!(neighbors.len(), 4);
    assert_eq!(neighbors[0], vec![(1, 1.0), (2, 9.0)]);
    assert_eq!(neighbors[3], vec![(2, 49.0), (1, 81.0)]);
}

#[test]
fn test_joint_probabilities_symmetric() {
    let (data, _) = common::gaussian_blobs(&[vec![0.0, 0.0, 0.0], vec![5.0, 5.0, 5.0]], 15, 1.0, 3);
    let neighbors = affinity::nearest_neighbors(&data, 3, 10);
    let p = JointProbabilities::from_neighbors(&neighbors, 4.0);

    assert!((p.sum() - 1.0).abs() < 1e-9);
    for (i, row) in p.rows.iter().enumerate() {
        for &(j, pij) in row {
            let pji = p.rows[j]
                .iter()
                .find(|(k, _)| *k == i)
                .map(|(_, v)| *v)
                .expect("symmetric entry");
            assert!((pij - pji).abs() < 1e-12);
        }
    }
}

#[test]
fn test_tsne_separates_clusters() -> anyhow::Result<()> {
    let centres = vec![vec![0.0; 10], vec![8.0; 10], {
        let mut c = vec![0.0; 10];
        c[0] = 16.0;
        c
    }];
    let (data, labels) = common::gaussian_blobs(&centres, 25, 0.5, 11);
    let params = TsneParams {
        perplexity: 10.0,
        max_iter: 500,
        ..TsneParams::default()
    };
    let embedding = tsne::fit(&data, 10, &params, &mut StdRng::seed_from_u64(666))?;

    assert_eq!(embedding.points.len(), 75);
    assert!(embedding.points.iter().all(|p| p[0].is_finite() && p[1].is_finite()));
    assert!(embedding.kl_divergence.is_finite());
    assert!(embedding.iterations > 250 && embedding.iterations <= 500);

    let groups: Vec<Vec<[f32; 2]>> = (0..3)
        .map(|c| {
            embedding
                .points
                .iter()
                .zip(&labels)
                .filter(|(_, l)| **l == c)
                .map(|(p, _)| *p)
                .collect()
        })
        .collect();
    let centres: Vec<[f32; 2]> = groups.iter().map(|g| centroid(g)).collect();
    let spread: f32 = groups
        .iter()
        .zip(&centres)
        .map(|(g, c)| g.iter().map(|p| dist(*p, *c)).sum::<f32>() / g.len() as f32)
        .fold(0.0, f32::max);
    for a in 0..3 {
        for b in (a + 1)..3 {
            assert!(dist(centres[a], centres[b]) > 2.0 * spread);
        }
    }
    Ok(())
}

#[test]
fn test_tsne_is_deterministic_for_a_seed() -> anyhow::Result<()> {
    let (data, _) = common::gaussian_blobs(&[vec![0.0; 4], vec![3.0; 4]], 10, 1.0, 5);
    let params = TsneParams {
        perplexity: 5.0,
        max_iter: 100,
        init: TsneInit::Random,
        ..TsneParams::default()
    };
    let a = tsne::fit(&data, 4, &params, &mut StdRng::seed_from_u64(1))?;
    let b = tsne::fit(&data, 4, &params, &mut StdRng::seed_from_u64(1))?;
    assert_eq!(a.points, b.points);
    assert_eq!(a.iterations, 100);
    Ok(())
}

#[test]
fn test_tsne_input_errors() {
    let mut rng = StdRng::seed_from_u64(0);
    let params = TsneParams::default();

    let single = tsne::fit(&[1.0, 2.0], 2, &params, &mut rng);
    assert!(matches!(single, Err(EvalError::Tsne(_))));

    let ragged = tsne::fit(&[1.0, 2.0, 3.0], 2, &params, &mut rng);
    assert!(matches!(ragged, Err(EvalError::Tsne(_))));

    // 10 points cannot support a perplexity of 30.
    let (data, _) = common::gaussian_blobs(&[vec![0.0, 0.0]], 10, 1.0, 1);
    let small = tsne::fit(&data, 2, &params, &mut rng);
    assert!(matches!(small, Err(EvalError::Tsne(_))));

    let mut bad = data.clone();
    bad[3] = f32::NAN;
    let low = TsneParams {
        perplexity: 3.0,
        ..TsneParams::default()
    };
    assert!(matches!(tsne::fit(&bad, 2, &low, &mut rng), Err(EvalError::Tsne(_))));
}

#[test]
fn test_subsample_indices() {
    let mut rng = StdRng::seed_from_u64(2);
    assert_eq!(tsne::subsample_indices(5, None, &mut rng), vec![0, 1, 2, 3, 4]);
    assert_eq!(tsne::subsample_indices(5, Some(10), &mut rng), vec![0, 1, 2, 3, 4]);

    let picked = tsne::subsample_indices(100, Some(20), &mut rng);
    assert_eq!(picked.len(), 20);
    assert!(picked.windows(2).all(|w| w[0] < w[1]));
    assert!(picked.iter().all(|&i| i < 100));
}
