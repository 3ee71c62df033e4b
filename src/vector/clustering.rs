//! K-means clustering used to train both the coarse quantizer and the
//! product-quantization sub-codebooks.
//!
//! # Algorithm Details
//! - Distance metric: squared Euclidean
//! - Initialization: K-means++ (randomised, so results are not deterministic)
//! - Iterations: caller supplied upper bound, early exit when no assignment changes
//! - Empty clusters are re-seeded from a random input point
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - Assignment step runs in parallel (rayon)

use crate::vector::types::CentroidId;
use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

/// Default iteration cap, matching the usual IVF training setting.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Epsilon for floating-point comparisons.
const EPSILON: f64 = 1e-12;

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a vector of the same dimension as input vectors.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<CentroidId>,

    /// Number of iterations run.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are generated before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,
}

/// Squared Euclidean distance between two equal-length slices.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Performs K-means clustering with squared Euclidean distance.
///
/// # Arguments
/// * `vectors` - Input vectors to cluster (must be non-empty and same dimension)
/// * `k` - Number of clusters (must be >= 1 and <= number of vectors)
/// * `max_iterations` - Upper bound on Lloyd iterations
///
/// When the input has fewer than `k` distinct points, the surplus centroids
/// duplicate existing points. Every centroid id in `0..k` is still produced.
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    k: usize,
    max_iterations: usize,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k);
    let mut assignments: Vec<CentroidId> = Vec::new();
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations.max(1) {
        iterations += 1;

        let new_assignments: Vec<CentroidId> = vectors
            .par_iter()
            .map(|vector| assign_to_nearest_centroid(vector, &centroids).0)
            .collect();

        if new_assignments == assignments {
            converged = true;
            break;
        }
        assignments = new_assignments;
        centroids = update_centroids(vectors, &assignments, k);
    }

    if !converged {
        // Still usable: the last update is consistent with `assignments`
        // up to one Lloyd step.
        assignments = vectors
            .par_iter()
            .map(|vector| assign_to_nearest_centroid(vector, &centroids).0)
            .collect();
        warn!(k, iterations, "k-means stopped at the iteration cap before converging");
    } else {
        debug!(k, iterations, "k-means converged");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Finds the nearest centroid by squared Euclidean distance.
///
/// Returns the centroid id and its distance. On ties the lower id wins.
///
/// # Panics
/// Panics in debug builds if `centroids` is empty.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> (CentroidId, f32) {
    debug_assert!(!centroids.is_empty(), "need at least one centroid");

    let mut best_distance = f32::INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_l2(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best_cluster = i;
        }
    }

    (CentroidId::new(best_cluster as u32), best_distance)
}

/// Recomputes centroids as the mean of their assigned vectors.
fn update_centroids(vectors: &[&[f32]], assignments: &[CentroidId], k: usize) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut sums = vec![vec![0.0f64; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster) in vectors.iter().zip(assignments.iter()) {
        let idx = cluster.as_index();
        for (sum, &value) in sums[idx].iter_mut().zip(vector.iter()) {
            *sum += f64::from(value);
        }
        cluster_sizes[idx] += 1;
    }

    let mut rng = rand::rng();
    sums.into_iter()
        .zip(cluster_sizes)
        .map(|(sum, size)| {
            if size == 0 {
                // Empty cluster: re-seed from a random point
                vectors[rng.random_range(0..vectors.len())].to_vec()
            } else {
                sum.into_iter().map(|s| (s / size as f64) as f32).collect()
            }
        })
        .collect()
}

/// Initializes centroids using the K-means++ algorithm.
///
/// Keeps a running nearest-centroid distance per point, so seeding costs
/// O(n * k * d) rather than re-scanning every centroid per step.
fn initialize_centroids_kmeans_plus_plus(vectors: &[&[f32]], k: usize) -> Vec<Vec<f32>> {
    let mut rng = rand::rng();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(vectors[first_idx].to_vec());

    let mut min_distances: Vec<f32> = vectors
        .par_iter()
        .map(|v| squared_l2(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_distances.iter().map(|&d| f64::from(d)).sum();
        if total < EPSILON {
            // Every point coincides with a centroid already
            break;
        }

        // Points sitting on a centroid have weight zero and are never chosen
        let target = rng.random::<f64>() * total;
        let mut cumulative = 0.0f64;
        let chosen = min_distances
            .iter()
            .position(|&d| {
                if d <= 0.0 {
                    return false;
                }
                cumulative += f64::from(d);
                cumulative >= target
            })
            .or_else(|| min_distances.iter().rposition(|&d| d > 0.0));

        let Some(idx) = chosen else { break };
        let centroid = vectors[idx].to_vec();

        min_distances
            .par_iter_mut()
            .zip(vectors.par_iter())
            .for_each(|(min_d, v)| {
                let d = squared_l2(v, &centroid);
                if d < *min_d {
                    *min_d = d;
                }
            });
        centroids.push(centroid);
    }

    if centroids.len() < k {
        debug!(
            distinct = centroids.len(),
            k, "fewer distinct points than clusters, duplicating centroids"
        );
        while centroids.len() < k {
            let idx = rng.random_range(0..vectors.len());
            centroids.push(vectors[idx].to_vec());
        }
    }

    centroids
}
