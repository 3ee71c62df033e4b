//! Answer generation: retrieve, assemble, generate.
//!
//! The language model itself is an external collaborator behind the
//! [`Generator`] trait. [`Pipeline`] wires it to a [`Retriever`] and a
//! [`PromptAssembler`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::QuarryError;
use crate::prompt::PromptAssembler;
use crate::retrieve::{RetrievedPassage, Retriever};

/// Sampling options passed through to the generator unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_do_sample")]
    pub do_sample: bool,
}

fn default_max_new_tokens() -> usize {
    150
}
fn default_top_k() -> usize {
    50
}
fn default_top_p() -> f32 {
    0.95
}
fn default_do_sample() -> bool {
    true
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            do_sample: default_do_sample(),
        }
    }
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation backend failed: {0}\nSuggestion: Check the backend logs; the request can be retried")]
    Backend(String),

    #[error("Generation backend is unavailable: {0}\nSuggestion: Verify the model server is running")]
    Unavailable(String),
}

/// Produces answer text from an assembled prompt.
///
/// Calls block until the answer is complete. Timeouts and retries are the
/// implementation's concern.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str, options: &GenerationOptions)
    -> Result<String, GenerationError>;
}

/// An answer together with everything used to produce it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub prompt: String,
    /// Passages cited in the prompt, nearest first.
    pub sources: Vec<RetrievedPassage>,
    /// Hits dropped because the store had no row for them.
    pub dropped: usize,
}

/// Retrieved passages and the prompt built from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedPrompt {
    pub prompt: String,
    /// Nearest first.
    pub passages: Vec<RetrievedPassage>,
    pub dropped: usize,
}

impl PreparedPrompt {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Retrieve → assemble → generate.
///
/// Without a generator the pipeline stops after [`Pipeline::prepare`].
pub struct Pipeline {
    retriever: Retriever,
    assembler: PromptAssembler,
    generator: Option<Arc<dyn Generator>>,
    options: GenerationOptions,
    top_k: usize,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("retriever", &self.retriever)
            .field("options", &self.options)
            .field("top_k", &self.top_k)
            .field("has_generator", &self.generator.is_some())
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        retriever: Retriever,
        assembler: PromptAssembler,
        generator: Arc<dyn Generator>,
        options: GenerationOptions,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            assembler,
            generator: Some(generator),
            options,
            top_k,
        }
    }

    /// A pipeline that retrieves and assembles prompts only.
    pub fn retrieval_only(retriever: Retriever, assembler: PromptAssembler, top_k: usize) -> Self {
        Self {
            retriever,
            assembler,
            generator: None,
            options: GenerationOptions::default(),
            top_k,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Retrieves passages and assembles the prompt without generating.
    pub fn prepare(&self, query: &str) -> Result<PreparedPrompt, QuarryError> {
        let report = self.retriever.retrieve(query, self.top_k)?;
        let prompt = self.assembler.assemble(query, &report.passages);
        debug!(
            passages = report.passages.len(),
            prompt_chars = prompt.len(),
            "assembled prompt"
        );
        Ok(PreparedPrompt {
            prompt,
            passages: report.passages,
            dropped: report.dropped,
        })
    }

    /// Answers `query` from the indexed passages.
    ///
    /// A query that retrieves nothing still reaches the generator with a
    /// citation-free prompt.
    ///
    /// # Errors
    /// `GenerationError::Unavailable` when the pipeline has no generator.
    pub fn answer(&self, query: &str) -> Result<Answer, QuarryError> {
        let generator = self.generator.as_ref().ok_or_else(|| {
            GenerationError::Unavailable("no generation backend configured".to_string())
        })?;
        let prepared = self.prepare(query)?;
        let text = generator.generate(&prepared.prompt, &self.options)?;
        info!(
            sources = prepared.passages.len(),
            answer_chars = text.len(),
            "generated answer"
        );
        Ok(Answer {
            text,
            prompt: prepared.prompt,
            sources: prepared.passages,
            dropped: prepared.dropped,
        })
    }
}
