//! Metadata sidecar for persisted indexes.
//!
//! Records the embedding model and index geometry so a reopened index can
//! be checked against the artifacts it was saved with.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::vector::types::VectorError;

/// File name of the metadata sidecar inside an index directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Current UTC time as Unix seconds.
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Metadata for index persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Name of the embedding model used
    pub model_name: String,

    /// Dimension of embeddings
    pub dimension: usize,

    /// Number of vectors in the index
    pub vector_count: usize,

    /// Number of coarse centroids
    pub nlist: usize,

    /// Number of sub-quantizers
    pub m: usize,

    /// Bits per sub-code
    pub nbits: u32,

    /// Unix timestamp when created
    pub created_at: u64,

    /// Unix timestamp when last updated
    pub updated_at: u64,

    /// Version of the metadata format
    pub version: u32,
}

impl IndexMetadata {
    /// Current metadata version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create new metadata with current timestamp
    pub fn new(
        model_name: String,
        dimension: usize,
        vector_count: usize,
        nlist: usize,
        m: usize,
        nbits: u32,
    ) -> Self {
        let now = get_utc_timestamp();
        Self {
            model_name,
            dimension,
            vector_count,
            nlist,
            m,
            nbits,
            created_at: now,
            updated_at: now,
            version: Self::CURRENT_VERSION,
        }
    }

    /// Update the vector count and timestamp
    pub fn update(&mut self, vector_count: usize) {
        self.vector_count = vector_count;
        self.updated_at = get_utc_timestamp();
    }

    /// Save metadata into the index directory
    pub fn save(&self, dir: &Path) -> Result<(), VectorError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            VectorError::InvalidFormat(format!("Failed to serialize metadata: {e}"))
        })?;
        std::fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    /// Load metadata from the index directory
    pub fn load(dir: &Path) -> Result<Self, VectorError> {
        let json = std::fs::read_to_string(dir.join(METADATA_FILE))?;
        let metadata: Self = serde_json::from_str(&json)
            .map_err(|e| VectorError::InvalidFormat(format!("Failed to parse metadata: {e}")))?;

        if metadata.version > Self::CURRENT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                actual: metadata.version,
            });
        }

        Ok(metadata)
    }

    /// Check if a metadata file exists
    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).exists()
    }
}
