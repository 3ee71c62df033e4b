//! Passage retrieval for retrieval-augmented generation.
//!
//! Documents are chunked into passages ([`ingest`]), stored by id
//! ([`store`]), embedded and indexed with a compressed IVF-PQ index
//! ([`vector`]), and retrieved by similarity ([`retrieve`]). Retrieved
//! passages are formatted into a prompt ([`prompt`]) for a pluggable
//! generation backend ([`generate`]).

pub mod config;
pub mod display;
pub mod error;
pub mod generate;
pub mod ingest;
pub mod prompt;
pub mod retrieve;
pub mod store;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{ExitCode, QuarryError, QuarryResult};
pub use generate::{
    Answer, GenerationError, GenerationOptions, Generator, Pipeline, PreparedPrompt,
};
pub use ingest::{IngestError, IngestReport, ingest_directory};
pub use prompt::PromptAssembler;
pub use retrieve::{RetrievalReport, RetrievedPassage, Retriever};
pub use store::{JsonPassageStore, NewPassage, Passage, PassageStore, StoreError};
pub use vector::{
    EmbeddingGenerator, FastEmbedGenerator, IndexParams, IvfPqIndex, PassageId, Score, SlotId,
    VectorDimension, VectorError, VectorSearchEngine,
};
