//! Compressed approximate nearest-neighbor search.
//!
//! # Architecture
//! Vectors are indexed with IVF-PQ: a coarse k-means quantizer partitions
//! the space into `nlist` inverted lists, and each vector is stored as a
//! product-quantized code of its residual against the assigned centroid.
//! Queries probe the `nprobe` closest lists and score codes through
//! per-list lookup tables.
//!
//! Index slots are dense ordinals. [`SlotMapping`] translates them to the
//! passage ids of the content store, and [`VectorSearchEngine`] keeps the
//! two persisted side by side.

mod clustering;
mod embedding;
mod engine;
mod index;
mod mapping;
mod metadata;
mod quantizer;
mod storage;
mod trainer;
mod types;

// Re-export core types for public API
pub use clustering::{
    ClusteringError, DEFAULT_MAX_ITERATIONS, KMeansResult, assign_to_nearest_centroid,
    kmeans_clustering, squared_l2,
};
#[cfg(test)]
pub use embedding::MockEmbeddingGenerator;
pub use embedding::{EmbeddingGenerator, FastEmbedGenerator, parse_embedding_model};
pub use engine::{INDEX_FILE, MAPPING_FILE, VectorSearchEngine};
pub use index::{IndexState, InvertedList, IvfPqIndex};
pub use mapping::SlotMapping;
pub use metadata::{IndexMetadata, METADATA_FILE, get_utc_timestamp};
pub use quantizer::{MAX_NBITS, ProductQuantizer};
pub use trainer::{
    CodebookTrainer, DEFAULT_M, DEFAULT_NBITS, IndexParams, TrainedModel, default_nlist,
};
pub use types::{
    CentroidId, PassageId, Score, SearchHit, SlotId, VECTOR_DIMENSION_384, VectorDimension,
    VectorError,
};
