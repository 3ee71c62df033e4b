//! Prompt assembly for the generation backend.
//!
//! Layout:
//! ```text
//! SYSTEM: <preamble>
//! USER QUERY: <query>
//! CONTEXT:
//! [doc_id | page] passage text
//! ...
//! ```
//! Passages appear in retrieval order (nearest first). With no passages the
//! prompt still carries the preamble and the query.

use crate::retrieve::RetrievedPassage;

/// Instruction block placed at the top of every prompt.
pub const DEFAULT_PREAMBLE: &str = "You are an assistant for question answering over the ingested documents. \
Use only the provided context. Cite sources as [doc_id | page]. \
Include a confidence score (0-1) for each answer.";

/// Builds prompts from a query and its retrieved passages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAssembler {
    preamble: String,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            preamble: DEFAULT_PREAMBLE.to_string(),
        }
    }
}

impl PromptAssembler {
    /// An assembler with a custom instruction preamble.
    pub fn with_preamble(preamble: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
        }
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    /// Formats the prompt. Pure: the same inputs always give the same text.
    pub fn assemble(&self, query: &str, passages: &[RetrievedPassage]) -> String {
        let mut prompt = format!("SYSTEM: {}\nUSER QUERY: {query}\nCONTEXT:\n", self.preamble);
        for retrieved in passages {
            prompt.push_str(&citation_line(retrieved));
            prompt.push('\n');
        }
        prompt
    }
}

/// `[doc_id | page] text`, with line breaks inside the text flattened so
/// each passage stays on one line.
pub fn citation_line(retrieved: &RetrievedPassage) -> String {
    let passage = &retrieved.passage;
    let text = passage.text.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("[{} | {}] {text}", passage.doc_id, passage.page_number)
}
