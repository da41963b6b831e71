//! Deterministic test corpora.
//!
//! Seeded generators shared by the integration tests and the recall
//! benchmark: same seed, same corpus, every run and every machine.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// A generated corpus of embedding vectors with known cluster structure.
pub struct Corpus {
    /// One vector per item.
    pub vectors: Vec<Vec<f32>>,
    /// Ground-truth cluster index per item.
    pub cluster_of: Vec<usize>,
    /// Cluster centers.
    pub centers: Vec<Vec<f32>>,
}

/// Generate `n` vectors of dimension `dim` spread over `clusters` Gaussian
/// blobs. Deterministic for identical `(seed, n, dim, clusters, spread)`.
pub fn clustered_corpus(seed: u64, n: usize, dim: usize, clusters: usize, spread: f32) -> Corpus {
    assert!(clusters > 0 && dim > 0);
    let mut rng = SmallRng::seed_from_u64(seed);

    let centers: Vec<Vec<f32>> = (0..clusters)
        .map(|_| (0..dim).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect();

    let mut vectors = Vec::with_capacity(n);
    let mut cluster_of = Vec::with_capacity(n);
    for i in 0..n {
        let c = i % clusters;
        let center = &centers[c];
        let vector = center
            .iter()
            .map(|&base| base + gaussian(&mut rng) * spread)
            .collect();
        vectors.push(vector);
        cluster_of.push(c);
    }

    Corpus {
        vectors,
        cluster_of,
        centers,
    }
}

/// Generate `n` uniformly random vectors in `[-1, 1]^dim`.
pub fn uniform_corpus(seed: u64, n: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

/// Distinct text payloads, one per index. Useful when a test needs unique
/// content that still dedups predictably on repeats.
pub fn text_payloads(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("payload item {:06}", i)).collect()
}

/// Box-Muller, one sample per call.
fn gaussian(rng: &mut SmallRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}
