//! Inverted-file index over product-quantized residuals (IVF-PQ).
//!
//! # Lifecycle
//! `Untrained -> Trained -> Populated`. Training happens once; retraining
//! requires a fresh index because stored codes are only meaningful against
//! the codebooks they were encoded with. After population the index is
//! read-only in practice and `search` takes `&self`, so concurrent queries
//! need no locking.
//!
//! # Search
//! 1. Rank all coarse centroids by distance to the query, keep `nprobe`
//! 2. For each probed list, build a PQ lookup table for the query residual
//! 3. Score every stored code by table lookups and keep the best `k`

use rayon::prelude::*;
use tracing::{debug, info};

use crate::vector::clustering::{assign_to_nearest_centroid, squared_l2};
use crate::vector::trainer::{CodebookTrainer, IndexParams, TrainedModel, residual};
use crate::vector::types::{CentroidId, SearchHit, SlotId, VectorDimension, VectorError};

/// Where an index is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Untrained,
    Trained,
    Populated,
}

/// Vectors assigned to one coarse centroid, in add order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvertedList {
    pub(crate) slots: Vec<SlotId>,
    /// `m` code bytes per entry, concatenated.
    pub(crate) codes: Vec<u8>,
}

impl InvertedList {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the list holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates `(slot, code)` pairs in insertion order.
    pub fn entries(&self, m: usize) -> impl Iterator<Item = (SlotId, &[u8])> + '_ {
        self.slots.iter().copied().zip(self.codes.chunks_exact(m))
    }

    pub(crate) fn push(&mut self, slot: SlotId, code: &[u8]) {
        self.slots.push(slot);
        self.codes.extend_from_slice(code);
    }
}

/// IVF-PQ approximate nearest neighbor index.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfPqIndex {
    pub(crate) dimension: VectorDimension,
    pub(crate) params: IndexParams,
    pub(crate) model: Option<TrainedModel>,
    pub(crate) lists: Vec<InvertedList>,
    pub(crate) ntotal: usize,
}

impl IvfPqIndex {
    /// Creates an untrained index.
    pub fn new(dimension: VectorDimension, params: IndexParams) -> Result<Self, VectorError> {
        // Validates m/nbits against the dimension up front
        CodebookTrainer::new(dimension, params)?;
        Ok(Self {
            dimension,
            params,
            model: None,
            lists: Vec::new(),
            ntotal: 0,
        })
    }

    /// Creates an empty, trained index from an already trained model.
    #[must_use]
    pub fn from_trained(model: TrainedModel) -> Self {
        let params = IndexParams {
            nlist: Some(model.nlist()),
            m: model.quantizer.m(),
            nbits: model.quantizer.nbits(),
            ..IndexParams::default()
        };
        Self {
            dimension: model.dimension,
            params,
            lists: vec![InvertedList::default(); model.nlist()],
            model: Some(model),
            ntotal: 0,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        match (&self.model, self.ntotal) {
            (None, _) => IndexState::Untrained,
            (Some(_), 0) => IndexState::Trained,
            (Some(_), _) => IndexState::Populated,
        }
    }

    /// Vector dimension fixed at creation.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Parameters the index was created or trained with.
    #[must_use]
    pub fn params(&self) -> IndexParams {
        self.params
    }

    /// Trained parameters, if any.
    #[must_use]
    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    /// Number of coarse centroids (zero before training).
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.model.as_ref().map_or(0, TrainedModel::nlist)
    }

    /// Total number of vectors added.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ntotal
    }

    /// Whether no vectors have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ntotal == 0
    }

    /// Inverted lists, indexed by centroid id.
    #[must_use]
    pub fn lists(&self) -> &[InvertedList] {
        &self.lists
    }

    /// Trains the coarse quantizer and sub-codebooks.
    ///
    /// Valid only once, on an untrained index.
    pub fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        if self.model.is_some() {
            return Err(VectorError::AlreadyTrained);
        }

        let model = CodebookTrainer::new(self.dimension, self.params)?.train(vectors)?;
        self.params.nlist = Some(model.nlist());
        self.lists = vec![InvertedList::default(); model.nlist()];
        self.model = Some(model);
        Ok(())
    }

    /// Encodes vectors and appends them to their inverted lists.
    ///
    /// All vectors are validated before anything is appended, so a failed
    /// call leaves the index unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>], slots: &[SlotId]) -> Result<(), VectorError> {
        let model = self.model.as_ref().ok_or(VectorError::NotTrained)?;

        if vectors.len() != slots.len() {
            return Err(VectorError::LengthMismatch {
                vectors: vectors.len(),
                slots: slots.len(),
            });
        }
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }

        let encoded: Vec<(CentroidId, Vec<u8>)> = vectors
            .par_iter()
            .map(|vector| {
                let (centroid, _) = assign_to_nearest_centroid(vector, &model.centroids);
                let code = model
                    .quantizer
                    .encode(&residual(vector, &model.centroids[centroid.as_index()]));
                (centroid, code)
            })
            .collect();

        for ((centroid, code), slot) in encoded.into_iter().zip(slots.iter()) {
            self.lists[centroid.as_index()].push(*slot, &code);
        }
        self.ntotal += vectors.len();

        debug!(added = vectors.len(), total = self.ntotal, "added vectors");
        Ok(())
    }

    /// Finds the `k` approximate nearest neighbors of `query`.
    ///
    /// Probes the `nprobe` closest coarse centroids (clamped to `1..=nlist`).
    /// Results are ascending by distance, ties by slot, and may be shorter
    /// than `k` when fewer candidates were scanned.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let model = self.model.as_ref().ok_or(VectorError::NotTrained)?;
        self.dimension.validate_vector(query)?;

        if k == 0 || self.ntotal == 0 {
            return Ok(Vec::new());
        }

        let probes = self.probe_order(model, query, nprobe);
        let m = model.quantizer.m();

        let mut candidates: Vec<SearchHit> = Vec::new();
        for centroid in &probes {
            let list = &self.lists[centroid.as_index()];
            if list.is_empty() {
                continue;
            }
            let query_residual = residual(query, &model.centroids[centroid.as_index()]);
            let table = model.quantizer.distance_table(&query_residual);
            candidates.extend(list.entries(m).map(|(slot, code)| SearchHit {
                slot,
                distance: model.quantizer.table_distance(&table, code),
            }));
        }

        let scanned = candidates.len();
        if candidates.len() > k {
            candidates.select_nth_unstable_by(k - 1, SearchHit::rank_cmp);
            candidates.truncate(k);
        }
        candidates.sort_by(SearchHit::rank_cmp);

        debug!(
            probed = probes.len(),
            scanned,
            returned = candidates.len(),
            "search complete"
        );
        Ok(candidates)
    }

    /// Centroids to visit, nearest first, lower id first on ties.
    fn probe_order(&self, model: &TrainedModel, query: &[f32], nprobe: usize) -> Vec<CentroidId> {
        let nprobe = nprobe.clamp(1, model.nlist());
        let mut ranked: Vec<(f32, CentroidId)> = model
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (squared_l2(query, c), CentroidId::new(i as u32)))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        ranked.into_iter().take(nprobe).map(|(_, id)| id).collect()
    }

    /// Sizes of the inverted lists, for diagnostics.
    #[must_use]
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(InvertedList::len).collect()
    }

    /// Logs a one-line summary of the index shape.
    pub fn log_summary(&self) {
        let sizes = self.list_sizes();
        info!(
            vectors = self.ntotal,
            nlist = self.nlist(),
            m = self.params.m,
            nbits = self.params.nbits,
            largest_list = sizes.iter().max().copied().unwrap_or(0),
            empty_lists = sizes.iter().filter(|&&s| s == 0).count(),
            "index summary"
        );
    }
}
