//! Codebook training: coarse centroids plus product-quantization codebooks.
//!
//! Training is a one-shot batch step. The trainer keeps no reference to the
//! corpus; everything it learns is returned in a [`TrainedModel`].

use tracing::info;

use crate::vector::clustering::{DEFAULT_MAX_ITERATIONS, kmeans_clustering};
use crate::vector::quantizer::ProductQuantizer;
use crate::vector::types::{VectorDimension, VectorError};

/// Default number of sub-quantizers.
pub const DEFAULT_M: usize = 16;

/// Default bits per sub-code.
pub const DEFAULT_NBITS: u32 = 8;

/// Tunable parameters of an IVF-PQ index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexParams {
    /// Number of coarse centroids. `None` picks `round(sqrt(N))` at training time.
    pub nlist: Option<usize>,
    /// Number of sub-quantizers; must divide the vector dimension.
    pub m: usize,
    /// Bits per sub-code (1..=8).
    pub nbits: u32,
    /// Iteration cap for every k-means run.
    pub max_iterations: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            nlist: None,
            m: DEFAULT_M,
            nbits: DEFAULT_NBITS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// `round(sqrt(n))`, never below one.
#[must_use]
pub fn default_nlist(corpus_size: usize) -> usize {
    ((corpus_size as f64).sqrt().round() as usize).max(1)
}

/// Parameters learned by [`CodebookTrainer::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub dimension: VectorDimension,
    /// Coarse quantizer, `nlist` vectors of `dimension` components.
    pub centroids: Vec<Vec<f32>>,
    /// Sub-codebooks trained on residuals against `centroids`.
    pub quantizer: ProductQuantizer,
}

impl TrainedModel {
    /// Number of coarse centroids.
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }
}

/// Runs k-means for the coarse quantizer and for each PQ sub-space.
#[derive(Debug, Clone)]
pub struct CodebookTrainer {
    dimension: VectorDimension,
    params: IndexParams,
}

impl CodebookTrainer {
    /// Creates a trainer for vectors of `dimension` components.
    pub fn new(dimension: VectorDimension, params: IndexParams) -> Result<Self, VectorError> {
        ProductQuantizer::check_geometry(dimension.get(), params.m, params.nbits)?;
        if params.nlist == Some(0) {
            return Err(VectorError::InvalidConfig(
                "nlist must be at least 1".to_string(),
            ));
        }
        Ok(Self { dimension, params })
    }

    /// Parameters this trainer was built with.
    #[must_use]
    pub fn params(&self) -> IndexParams {
        self.params
    }

    /// Trains coarse centroids and residual sub-codebooks.
    ///
    /// # Errors
    /// - `InsufficientData` when there are fewer vectors than `nlist`, or
    ///   fewer than `2^nbits`.
    /// - `DimensionMismatch` when any vector's length differs from the
    ///   trainer's dimension.
    pub fn train(&self, vectors: &[Vec<f32>]) -> Result<TrainedModel, VectorError> {
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }

        let n = vectors.len();
        let nlist = self.params.nlist.unwrap_or_else(|| default_nlist(n));
        let ksub = 1usize << self.params.nbits;

        if n < nlist {
            return Err(VectorError::InsufficientData {
                available: n,
                required: nlist,
                what: "coarse centroids",
            });
        }
        if n < ksub {
            return Err(VectorError::InsufficientData {
                available: n,
                required: ksub,
                what: "sub-quantizer codebooks",
            });
        }

        info!(
            vectors = n,
            nlist,
            m = self.params.m,
            nbits = self.params.nbits,
            "training coarse quantizer"
        );
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let coarse = kmeans_clustering(&refs, nlist, self.params.max_iterations)
            .map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;

        let residuals: Vec<Vec<f32>> = vectors
            .iter()
            .zip(coarse.assignments.iter())
            .map(|(vector, cluster)| residual(vector, &coarse.centroids[cluster.as_index()]))
            .collect();

        info!(
            iterations = coarse.iterations,
            "training sub-quantizer codebooks on residuals"
        );
        let quantizer = ProductQuantizer::train(
            &residuals,
            self.params.m,
            self.params.nbits,
            self.params.max_iterations,
        )?;

        Ok(TrainedModel {
            dimension: self.dimension,
            centroids: coarse.centroids,
            quantizer,
        })
    }
}

/// `vector - centroid`, component-wise.
pub(crate) fn residual(vector: &[f32], centroid: &[f32]) -> Vec<f32> {
    vector.iter().zip(centroid.iter()).map(|(v, c)| v - c).collect()
}
