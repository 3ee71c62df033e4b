//! Turns a directory of text files into stored passages.
//!
//! Files are discovered with `walkdir`, decoded as UTF-8 (falling back to
//! Latin-1), split into sentences and packed into overlapping chunks.
//! Ingestion is sequential; each file is chunked into a bounded sequence of
//! records that are inserted into the store in order.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::store::{NewPassage, PassageStore, StoreError};

/// A sentence is a run of non-terminators followed by terminators (and any
/// closing quotes or brackets), or by the end of the text.
static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^.!?]+(?:[.!?]+["')\]]*|$)|[.!?]+"#).expect("Invalid regex")
});

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to read {path}: {source}\nSuggestion: Check that the file exists and is readable")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {path}: {source}\nSuggestion: Check the [ingest] data_dir setting")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub passages: usize,
    pub skipped_empty: usize,
}

/// Lists files under `data_dir` whose extension is in `extensions`, sorted
/// by path.
pub fn discover_files(data_dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(data_dir).sort_by_file_name() {
        let entry = entry.map_err(|source| IngestError::Walk {
            path: data_dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if matches {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Reads a file as UTF-8, or as Latin-1 when it is not valid UTF-8.
pub fn read_text(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            debug!(path = %path.display(), "not UTF-8, decoding as Latin-1");
            Ok(err.into_bytes().into_iter().map(char::from).collect())
        }
    }
}

/// Splits text into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

/// Greedily packs sentences into chunks of at most `chunk_size` characters.
///
/// When a chunk is closed, the next one starts with its last `overlap`
/// characters. A single sentence longer than `chunk_size` becomes its own
/// oversized chunk rather than being cut.
pub fn chunk_sentences(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        let current_len = current.chars().count();
        if current_len + sentence.chars().count() <= chunk_size {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
            continue;
        }

        let closed = current.trim();
        if !closed.is_empty() {
            chunks.push(closed.to_string());
        }
        let tail: String = current.chars().skip(current_len.saturating_sub(overlap)).collect();
        current = if overlap == 0 || tail.trim().is_empty() {
            sentence.to_string()
        } else {
            format!("{tail} {sentence}")
        };
    }

    let last = current.trim();
    if !last.is_empty() {
        chunks.push(last.to_string());
    }
    chunks
}

/// Chunks one document into passages ready for insertion.
pub fn passages_for_document(
    path: &Path,
    text: &str,
    config: &IngestConfig,
) -> impl Iterator<Item = NewPassage> {
    let doc_id = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let file_path = path.display().to_string();

    chunk_sentences(text, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .enumerate()
        .map(move |(ordinal, chunk)| NewPassage {
            doc_id: doc_id.clone(),
            ordinal: ordinal as u32,
            page_number: 0,
            file_path: file_path.clone(),
            start_pos: 0,
            end_pos: chunk.chars().count(),
            text: chunk,
        })
}

/// Ingests every matching file under `config.data_dir` into `store`.
///
/// `on_file` is called after each file with its path and passage count.
pub fn ingest_directory(
    config: &IngestConfig,
    store: &dyn PassageStore,
    mut on_file: impl FnMut(&Path, usize),
) -> Result<IngestReport, IngestError> {
    let files = discover_files(&config.data_dir, &config.extensions)?;
    if files.is_empty() {
        warn!(dir = %config.data_dir.display(), "no matching text files found");
    }

    let mut report = IngestReport::default();
    for path in &files {
        let text = read_text(path)?;
        let mut count = 0;
        for passage in passages_for_document(path, &text, config) {
            store.insert_passage(passage)?;
            count += 1;
        }
        if count == 0 {
            report.skipped_empty += 1;
        }
        report.files += 1;
        report.passages += count;
        on_file(path, count);
    }

    info!(
        files = report.files,
        passages = report.passages,
        "ingestion complete"
    );
    Ok(report)
}
