//! Query-time retrieval: embed, search, resolve, fetch, score.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::error::QuarryError;
use crate::store::{Passage, PassageStore};
use crate::vector::{EmbeddingGenerator, Score, VectorError, VectorSearchEngine};

/// A passage returned for a query, with its distance and confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub passage: Passage,
    /// Approximate squared L2 distance between the query and the passage.
    pub distance: f32,
    /// `max(0, 1 - distance)`. A ranking aid, not a calibrated probability.
    pub confidence: Score,
}

/// Outcome of one retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalReport {
    /// Passages in ascending distance order.
    pub passages: Vec<RetrievedPassage>,
    /// Search hits whose passage id had no row in the store.
    pub dropped: usize,
}

impl RetrievalReport {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Turns query text into ranked passages.
///
/// Holds only shared, read-only handles, so one retriever can serve
/// concurrent queries.
pub struct Retriever {
    engine: Arc<VectorSearchEngine>,
    embedder: Arc<dyn EmbeddingGenerator>,
    store: Arc<dyn PassageStore>,
    nprobe: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("vectors", &self.engine.len())
            .field("nlist", &self.engine.nlist())
            .field("nprobe", &self.nprobe)
            .finish()
    }
}

impl Retriever {
    /// Creates a retriever over an opened engine.
    ///
    /// # Errors
    /// `DimensionMismatch` when the embedder does not produce vectors of the
    /// index dimension, which means a different model built the index.
    pub fn new(
        engine: Arc<VectorSearchEngine>,
        embedder: Arc<dyn EmbeddingGenerator>,
        store: Arc<dyn PassageStore>,
        config: &RetrievalConfig,
    ) -> Result<Self, QuarryError> {
        let expected = engine.dimension().get();
        let actual = embedder.dimension().get();
        if expected != actual {
            return Err(VectorError::DimensionMismatch { expected, actual }.into());
        }
        Ok(Self {
            engine,
            embedder,
            store,
            nprobe: config.nprobe,
        })
    }

    /// Overrides the number of probed lists.
    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe;
        self
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    pub fn engine(&self) -> &VectorSearchEngine {
        &self.engine
    }

    /// Retrieves up to `top_k` passages for `query_text`.
    ///
    /// Hits whose passage is missing from the store are skipped; their count
    /// is logged and reported in [`RetrievalReport::dropped`].
    pub fn retrieve(&self, query_text: &str, top_k: usize) -> Result<RetrievalReport, QuarryError> {
        let query = self.embedder.embed(query_text)?;
        let hits = self.engine.search(&query, top_k, self.nprobe)?;

        let mut report = RetrievalReport::default();
        for (passage_id, distance) in hits {
            match self.store.get_passage(passage_id)? {
                Some(passage) => report.passages.push(RetrievedPassage {
                    passage,
                    distance,
                    confidence: Score::from_distance(distance),
                }),
                None => {
                    debug!(%passage_id, "search hit has no row in the store");
                    report.dropped += 1;
                }
            }
        }

        if report.dropped > 0 {
            warn!(
                dropped = report.dropped,
                kept = report.passages.len(),
                "index and passage store are out of sync; rebuild the index"
            );
        }
        Ok(report)
    }
}
