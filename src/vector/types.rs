//! Type-safe wrappers and core types for the vector index.
//!
//! Newtypes keep slot numbers, centroid ids and external passage ids from
//! being mixed up. They are plain ordinals: slot 0 and centroid 0 are valid.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output dimension of the default embedding model (all-MiniLM-L6-v2).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Internal position of a vector inside the index.
///
/// Slots are assigned in add order and never reused or compacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u64);

impl SlotId {
    /// Creates a new `SlotId`.
    #[must_use]
    pub const fn new(slot: u64) -> Self {
        Self(slot)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Returns the slot as a `usize` index into the slot mapping.
    #[must_use]
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Creates from little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a coarse-quantizer centroid (and its inverted list).
///
/// Ids follow centroid order, so a lower id wins ties during probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CentroidId(u32);

impl CentroidId {
    /// Creates a new `CentroidId`.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the id as an index into the centroid table.
    #[must_use]
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

/// External content identifier, as issued by the passage store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassageId(u64);

impl PassageId {
    /// Creates a new `PassageId`.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PassageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Confidence attached to a retrieved passage, in `[0.0, 1.0]`.
///
/// Derived from the approximate distance as `max(0, 1 - distance)`. This is
/// a monotone transform of the distance, not a calibrated probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the score is not in the range [0.0, 1.0] or is NaN.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [0.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Converts an approximate squared distance into a confidence score.
    ///
    /// A NaN distance maps to zero confidence.
    #[must_use]
    pub fn from_distance(distance: f32) -> Self {
        let confidence = 1.0 - distance;
        if confidence.is_nan() {
            return Self::zero();
        }
        Self(confidence.clamp(0.0, 1.0))
    }

    /// Creates a score of 0.0.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    /// Creates a score of 1.0.
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Type-safe wrapper for vector dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// One entry of a search result: an index slot and its approximate
/// squared Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub slot: SlotId,
    pub distance: f32,
}

impl SearchHit {
    /// Ascending by distance, ties broken by ascending slot.
    pub(crate) fn rank_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

/// Errors that can occur during vector index operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Insufficient training data: {available} vectors, but {required} are needed to train {what}\nSuggestion: Ingest more passages or lower nlist/nbits"
    )]
    InsufficientData {
        available: usize,
        required: usize,
        what: &'static str,
    },

    #[error("Index has not been trained\nSuggestion: Train the index before adding or searching")]
    NotTrained,

    #[error(
        "Index is already trained\nSuggestion: Construct a fresh index to retrain; existing inverted lists would not match new codebooks"
    )]
    AlreadyTrained,

    #[error(
        "Slot {slot} is out of range for a mapping of length {len}\nSuggestion: Verify the slot mapping was saved together with the index"
    )]
    SlotOutOfRange { slot: u64, len: usize },

    #[error(
        "Index artifact holds {index_count} vectors but {artifact} holds {other_count}\nSuggestion: Rebuild the index so all artifacts are written together"
    )]
    ArtifactMismatch {
        index_count: usize,
        other_count: usize,
        artifact: &'static str,
    },

    #[error(
        "Got {vectors} vectors but {slots} slot numbers\nSuggestion: Pass exactly one slot number per vector"
    )]
    LengthMismatch { vectors: usize, slots: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid index configuration: {0}\nSuggestion: Check the [index] section of settings.toml")]
    InvalidConfig(String),

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error(
        "Invalid index format: {0}\nSuggestion: The artifact may be corrupted. Rebuild it with `quarry build`"
    )]
    InvalidFormat(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with this version of quarry"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure sufficient vectors are available for clustering (minimum: k clusters)"
    )]
    ClusteringFailed(String),
}
