//! Vector search engine that keeps the index and its slot mapping paired.
//!
//! The IVF-PQ index only knows slot numbers; the mapping translates them to
//! passage ids. Nothing in either structure enforces that they agree, so
//! this type is the single place where both are built, saved and opened
//! together, and where their vector counts are cross-checked.

use std::path::Path;

use tracing::{debug, info};

use crate::vector::{
    EmbeddingGenerator, IndexMetadata, IndexParams, IvfPqIndex, PassageId, SlotId, SlotMapping,
    VectorDimension, VectorError,
};

/// File name of the binary index inside an index directory.
pub const INDEX_FILE: &str = "index.ivfpq";

/// File name of the slot mapping inside an index directory.
pub const MAPPING_FILE: &str = "mapping.json";

/// A populated index together with the mapping and metadata saved beside it.
#[derive(Debug)]
pub struct VectorSearchEngine {
    index: IvfPqIndex,
    mapping: SlotMapping,
    metadata: IndexMetadata,
}

impl VectorSearchEngine {
    /// Pairs an index with its mapping.
    ///
    /// # Errors
    /// `ArtifactMismatch` when the mapping length differs from the number of
    /// vectors in the index.
    pub fn from_parts(
        index: IvfPqIndex,
        mapping: SlotMapping,
        model_name: impl Into<String>,
    ) -> Result<Self, VectorError> {
        check_paired(&index, &mapping)?;
        let params = index.params();
        let metadata = IndexMetadata::new(
            model_name.into(),
            index.dimension().get(),
            index.len(),
            index.nlist(),
            params.m,
            params.nbits,
        );
        Ok(Self {
            index,
            mapping,
            metadata,
        })
    }

    /// Embeds `passages`, trains a fresh index on them and adds them all.
    ///
    /// Slots are assigned in input order, so slot `i` holds `passages[i]`.
    /// Embedding runs in batches of `batch_size`; `on_batch` is called with
    /// the number of passages embedded so far.
    pub fn build(
        passages: &[(PassageId, &str)],
        embedder: &dyn EmbeddingGenerator,
        params: IndexParams,
        batch_size: usize,
        mut on_batch: impl FnMut(usize),
    ) -> Result<Self, VectorError> {
        let dimension = embedder.dimension();
        let mut index = IvfPqIndex::new(dimension, params)?;

        info!(
            passages = passages.len(),
            model = %embedder.model_name(),
            "embedding passages"
        );
        let mut vectors = Vec::with_capacity(passages.len());
        for batch in passages.chunks(batch_size.max(1)) {
            let texts: Vec<&str> = batch.iter().map(|(_, text)| *text).collect();
            vectors.extend(embedder.embed_many(&texts)?);
            on_batch(vectors.len());
        }

        index.train(&vectors)?;

        let mut mapping = SlotMapping::new();
        let slots: Vec<_> = passages.iter().map(|(id, _)| mapping.append(*id)).collect();
        index.add(&vectors, &slots)?;
        index.log_summary();

        Self::from_parts(index, mapping, embedder.model_name())
    }

    /// Appends already-embedded passages to a trained engine.
    ///
    /// The mapping is only extended after the index accepted every vector.
    pub fn add(&mut self, ids: &[PassageId], vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        let first = self.mapping.len() as u64;
        let slots: Vec<_> = (first..first + ids.len() as u64)
            .map(SlotId::new)
            .collect();
        self.index.add(vectors, &slots)?;
        for id in ids {
            self.mapping.append(*id);
        }
        self.metadata.update(self.index.len());
        Ok(())
    }

    /// Searches the index and resolves each hit to its passage id.
    ///
    /// Returns `(passage, distance)` pairs, ascending by distance.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<Vec<(PassageId, f32)>, VectorError> {
        let hits = self.index.search(query, k, nprobe)?;
        debug!(hits = hits.len(), k, nprobe, "resolving search hits");
        hits.into_iter()
            .map(|hit| Ok((self.mapping.resolve(hit.slot)?, hit.distance)))
            .collect()
    }

    /// Writes the index, mapping and metadata into `dir`.
    pub fn save(&mut self, dir: impl AsRef<Path>) -> Result<(), VectorError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        self.index.save(dir.join(INDEX_FILE))?;
        self.mapping.save(&dir.join(MAPPING_FILE))?;
        self.metadata.update(self.index.len());
        self.metadata.save(dir)?;

        info!(path = %dir.display(), vectors = self.index.len(), "saved index");
        Ok(())
    }

    /// Opens the artifacts in `dir` and checks that they belong together.
    ///
    /// # Errors
    /// `ArtifactMismatch` when the index, mapping and metadata disagree on
    /// the vector count; `DimensionMismatch` when metadata and index
    /// disagree on the dimension.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, VectorError> {
        let dir = dir.as_ref();
        let index = IvfPqIndex::open(dir.join(INDEX_FILE))?;
        let mapping = SlotMapping::load(&dir.join(MAPPING_FILE))?;
        let metadata = IndexMetadata::load(dir)?;

        check_paired(&index, &mapping)?;
        if metadata.vector_count != index.len() {
            return Err(VectorError::ArtifactMismatch {
                index_count: index.len(),
                other_count: metadata.vector_count,
                artifact: "metadata.json",
            });
        }
        if metadata.dimension != index.dimension().get() {
            return Err(VectorError::DimensionMismatch {
                expected: metadata.dimension,
                actual: index.dimension().get(),
            });
        }

        debug!(path = %dir.display(), vectors = index.len(), "opened index");
        Ok(Self {
            index,
            mapping,
            metadata,
        })
    }

    /// Whether `dir` holds a saved index.
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref();
        dir.join(INDEX_FILE).exists() && dir.join(MAPPING_FILE).exists()
    }

    #[must_use]
    pub fn index(&self) -> &IvfPqIndex {
        &self.index
    }

    #[must_use]
    pub fn mapping(&self) -> &SlotMapping {
        &self.mapping
    }

    #[must_use]
    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.index.dimension()
    }

    /// Number of coarse centroids, the upper bound for `nprobe`.
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.index.nlist()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn check_paired(index: &IvfPqIndex, mapping: &SlotMapping) -> Result<(), VectorError> {
    if index.len() != mapping.len() {
        return Err(VectorError::ArtifactMismatch {
            index_count: index.len(),
            other_count: mapping.len(),
            artifact: "mapping.json",
        });
    }
    Ok(())
}
