//! Product quantization of (residual) vectors.
//!
//! A `D`-dimensional vector is split into `m` contiguous sub-vectors of
//! `D / m` components. Each sub-vector is replaced by the index of its
//! nearest entry in a per-slice codebook of `2^nbits` entries, so a vector
//! compresses to `m` sub-codes. Codes are stored one byte per sub-code,
//! which bounds `nbits` to 8.
//!
//! Distances are asymmetric: the query stays uncompressed and a lookup
//! table of query-slice to codebook-entry distances is built once per
//! query (per probed list, since residuals depend on the centroid).

use rayon::prelude::*;
use tracing::debug;

use crate::vector::clustering::{kmeans_clustering, squared_l2};
use crate::vector::types::VectorError;

/// Largest supported number of bits per sub-code.
pub const MAX_NBITS: u32 = 8;

/// Trained product quantizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantizer {
    /// Full vector dimension.
    dimension: usize,
    /// Number of sub-quantizers.
    m: usize,
    /// Bits per sub-code.
    nbits: u32,
    /// Sub-vector width, `dimension / m`.
    dsub: usize,
    /// Codebooks, laid out as `[m][ksub][dsub]` in one flat buffer.
    codebooks: Vec<f32>,
}

impl ProductQuantizer {
    /// Validates a quantizer geometry without training anything.
    pub fn check_geometry(dimension: usize, m: usize, nbits: u32) -> Result<(), VectorError> {
        if m == 0 {
            return Err(VectorError::InvalidConfig(
                "m (number of sub-quantizers) must be at least 1".to_string(),
            ));
        }
        if dimension % m != 0 {
            return Err(VectorError::InvalidConfig(format!(
                "dimension {dimension} is not divisible by m = {m}"
            )));
        }
        if nbits == 0 || nbits > MAX_NBITS {
            return Err(VectorError::InvalidConfig(format!(
                "nbits must be between 1 and {MAX_NBITS}, got {nbits}"
            )));
        }
        Ok(())
    }

    /// Trains `m` sub-codebooks of `2^nbits` entries each.
    ///
    /// Sub-quantizers are independent and are trained in parallel.
    pub fn train(
        vectors: &[Vec<f32>],
        m: usize,
        nbits: u32,
        max_iterations: usize,
    ) -> Result<Self, VectorError> {
        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        Self::check_geometry(dimension, m, nbits)?;

        let ksub = 1usize << nbits;
        if vectors.len() < ksub {
            return Err(VectorError::InsufficientData {
                available: vectors.len(),
                required: ksub,
                what: "sub-quantizer codebooks",
            });
        }

        let dsub = dimension / m;
        let sub_codebooks: Vec<Vec<Vec<f32>>> = (0..m)
            .into_par_iter()
            .map(|sub| {
                let start = sub * dsub;
                let slices: Vec<&[f32]> =
                    vectors.iter().map(|v| &v[start..start + dsub]).collect();
                kmeans_clustering(&slices, ksub, max_iterations)
                    .map(|result| result.centroids)
                    .map_err(|e| VectorError::ClusteringFailed(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let codebooks: Vec<f32> = sub_codebooks.into_iter().flatten().flatten().collect();
        debug!(m, nbits, dsub, "trained product quantizer");

        Ok(Self {
            dimension,
            m,
            nbits,
            dsub,
            codebooks,
        })
    }

    /// Rebuilds a quantizer from persisted codebooks.
    pub fn from_parts(
        dimension: usize,
        m: usize,
        nbits: u32,
        codebooks: Vec<f32>,
    ) -> Result<Self, VectorError> {
        Self::check_geometry(dimension, m, nbits)?;
        let expected = (1usize << nbits) * dimension;
        if codebooks.len() != expected {
            return Err(VectorError::InvalidFormat(format!(
                "codebook buffer holds {} floats, expected {expected}",
                codebooks.len()
            )));
        }
        Ok(Self {
            dimension,
            m,
            nbits,
            dsub: dimension / m,
            codebooks,
        })
    }

    /// Number of sub-quantizers.
    #[must_use]
    pub fn m(&self) -> usize {
        self.m
    }

    /// Bits per sub-code.
    #[must_use]
    pub fn nbits(&self) -> u32 {
        self.nbits
    }

    /// Entries per sub-codebook.
    #[must_use]
    pub fn ksub(&self) -> usize {
        1 << self.nbits
    }

    /// Sub-vector width.
    #[must_use]
    pub fn dsub(&self) -> usize {
        self.dsub
    }

    /// Full vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Flat codebook buffer, `[m][ksub][dsub]`.
    #[must_use]
    pub fn codebooks(&self) -> &[f32] {
        &self.codebooks
    }

    /// Codebook entry `code` of sub-quantizer `sub`.
    #[must_use]
    pub fn centroid(&self, sub: usize, code: usize) -> &[f32] {
        let start = (sub * self.ksub() + code) * self.dsub;
        &self.codebooks[start..start + self.dsub]
    }

    /// Encodes a vector into `m` sub-codes.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        debug_assert_eq!(vector.len(), self.dimension);

        (0..self.m)
            .map(|sub| {
                let slice = &vector[sub * self.dsub..(sub + 1) * self.dsub];
                let mut best_code = 0;
                let mut best_distance = f32::INFINITY;
                for code in 0..self.ksub() {
                    let distance = squared_l2(slice, self.centroid(sub, code));
                    if distance < best_distance {
                        best_distance = distance;
                        best_code = code;
                    }
                }
                best_code as u8
            })
            .collect()
    }

    /// Reconstructs the approximate vector a code stands for.
    pub fn decode(&self, code: &[u8]) -> Vec<f32> {
        debug_assert_eq!(code.len(), self.m);
        code.iter()
            .enumerate()
            .flat_map(|(sub, &c)| self.centroid(sub, c as usize).iter().copied())
            .collect()
    }

    /// Precomputes the distance from each query slice to every codebook
    /// entry. Layout is `[m][ksub]`.
    pub fn distance_table(&self, query: &[f32]) -> Vec<f32> {
        debug_assert_eq!(query.len(), self.dimension);

        let ksub = self.ksub();
        let mut table = Vec::with_capacity(self.m * ksub);
        for sub in 0..self.m {
            let slice = &query[sub * self.dsub..(sub + 1) * self.dsub];
            for code in 0..ksub {
                table.push(squared_l2(slice, self.centroid(sub, code)));
            }
        }
        table
    }

    /// Approximate distance of a code, given a table from `distance_table`.
    #[inline]
    pub fn table_distance(&self, table: &[f32], code: &[u8]) -> f32 {
        let ksub = self.ksub();
        code.iter()
            .enumerate()
            .map(|(sub, &c)| table[sub * ksub + c as usize])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| (0..dim).map(|j| ((i * 7 + j * 3) % 11) as f32 * 0.1).collect())
            .collect()
    }

    #[test]
    fn test_geometry_validation() {
        assert!(ProductQuantizer::check_geometry(8, 4, 8).is_ok());
        assert!(matches!(
            ProductQuantizer::check_geometry(10, 4, 8),
            Err(VectorError::InvalidConfig(_))
        ));
        assert!(ProductQuantizer::check_geometry(8, 0, 8).is_err());
        assert!(ProductQuantizer::check_geometry(8, 4, 0).is_err());
        assert!(ProductQuantizer::check_geometry(8, 4, 9).is_err());
    }

    #[test]
    fn test_train_requires_ksub_vectors() {
        let vectors = grid_vectors(10, 8);
        let result = ProductQuantizer::train(&vectors, 2, 4, 10);
        assert!(matches!(
            result,
            Err(VectorError::InsufficientData {
                available: 10,
                required: 16,
                ..
            })
        ));
    }

    #[test]
    fn test_encode_decode_exact_when_codebook_covers_data() {
        // 16 vectors, 16 entries per codebook: every slice gets its own entry
        let vectors = grid_vectors(16, 8);
        let pq = ProductQuantizer::train(&vectors, 4, 4, 10).unwrap();

        assert_eq!(pq.m(), 4);
        assert_eq!(pq.ksub(), 16);
        assert_eq!(pq.dsub(), 2);
        assert_eq!(pq.codebooks().len(), 4 * 16 * 2);

        for vector in &vectors {
            let code = pq.encode(vector);
            assert_eq!(code.len(), 4);
            let decoded = pq.decode(&code);
            assert!(squared_l2(vector, &decoded) < 1e-9);
        }
    }

    #[test]
    fn test_table_distance_matches_decoded_distance() {
        let vectors = grid_vectors(32, 8);
        let pq = ProductQuantizer::train(&vectors, 2, 3, 10).unwrap();

        let query = vec![0.3, -0.2, 0.5, 0.1, 0.0, 0.9, -0.4, 0.2];
        let table = pq.distance_table(&query);
        assert_eq!(table.len(), 2 * 8);

        for vector in &vectors {
            let code = pq.encode(vector);
            let via_table = pq.table_distance(&table, &code);
            let direct = squared_l2(&query, &pq.decode(&code));
            assert!((via_table - direct).abs() < 1e-4);
        }
    }

    #[test]
    fn test_from_parts_round_trip() {
        let vectors = grid_vectors(16, 4);
        let pq = ProductQuantizer::train(&vectors, 2, 2, 10).unwrap();

        let rebuilt =
            ProductQuantizer::from_parts(4, 2, 2, pq.codebooks().to_vec()).unwrap();
        assert_eq!(rebuilt, pq);

        assert!(matches!(
            ProductQuantizer::from_parts(4, 2, 2, vec![0.0; 3]),
            Err(VectorError::InvalidFormat(_))
        ));
    }
}
