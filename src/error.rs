//! Error types for the retrieval pipeline
//!
//! Each layer has its own thiserror enum (`VectorError`, `StoreError`,
//! `IngestError`, `GenerationError`). `QuarryError` aggregates them for the
//! pipeline and the CLI, and maps every failure to a stable status code and
//! a process exit code. Nothing here is retried.

use std::path::PathBuf;

use thiserror::Error;

use crate::generate::GenerationError;
use crate::ingest::IngestError;
use crate::store::StoreError;
use crate::vector::VectorError;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("No index found at '{path}'")]
    IndexNotFound { path: PathBuf },

    #[error("The passage store at '{path}' is empty")]
    EmptyStore { path: PathBuf },
}

impl QuarryError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::Vector(e) => match e {
                VectorError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
                VectorError::InsufficientData { .. } => "INSUFFICIENT_DATA",
                VectorError::NotTrained => "NOT_TRAINED",
                VectorError::AlreadyTrained => "ALREADY_TRAINED",
                VectorError::SlotOutOfRange { .. } => "OUT_OF_RANGE",
                VectorError::ArtifactMismatch { .. } => "ARTIFACT_MISMATCH",
                VectorError::InvalidFormat(_) | VectorError::VersionMismatch { .. } => {
                    "INDEX_CORRUPTED"
                }
                VectorError::Storage(_) => "STORAGE_ERROR",
                VectorError::EmbeddingFailed(_) => "EMBEDDING_FAILED",
                VectorError::InvalidConfig(_) => "CONFIG_ERROR",
                _ => "VECTOR_ERROR",
            },
            Self::Store(StoreError::Unavailable(_)) => "STORE_UNAVAILABLE",
            Self::Store(_) => "STORE_ERROR",
            Self::Ingest(_) => "INGEST_ERROR",
            Self::Generation(_) => "GENERATION_FAILED",
            Self::ConfigLoad(_) | Self::InvalidConfig { .. } => "CONFIG_ERROR",
            Self::IndexNotFound { .. } => "INDEX_NOT_FOUND",
            Self::EmptyStore { .. } => "EMPTY_STORE",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::IndexNotFound { .. } => vec![
                "Run 'quarry ingest' to load documents into the passage store",
                "Then run 'quarry build' to train and save the index",
            ],
            Self::EmptyStore { .. } => vec![
                "Run 'quarry ingest <DIR>' before building the index",
                "Check the [ingest] extensions setting matches your files",
            ],
            Self::Vector(VectorError::InsufficientData { .. }) => vec![
                "Ingest more documents, or use a smaller chunk_size to get more passages",
                "Lower [index] nbits or nlist in settings.toml",
            ],
            Self::Vector(VectorError::ArtifactMismatch { .. })
            | Self::Vector(VectorError::InvalidFormat(_))
            | Self::Vector(VectorError::VersionMismatch { .. })
            | Self::Vector(VectorError::SlotOutOfRange { .. }) => vec![
                "Run 'quarry build' to rewrite all index artifacts together",
            ],
            Self::Vector(VectorError::DimensionMismatch { .. }) => vec![
                "The configured embedding model differs from the one that built the index",
                "Rebuild with 'quarry build' or restore the original [embedding] model",
            ],
            Self::ConfigLoad(_) | Self::InvalidConfig { .. } => vec![
                "Run 'quarry config' to inspect the effective settings",
                "Run 'quarry init --force' to regenerate settings.toml",
            ],
            Self::Store(StoreError::Corrupted(_)) => vec![
                "Re-run 'quarry ingest' to rebuild the passage store",
            ],
            Self::Generation(_) | Self::Store(StoreError::Unavailable(_)) => vec![
                "External services are not retried automatically; try the query again",
            ],
            _ => vec![],
        }
    }
}

/// Result type alias for pipeline operations
pub type QuarryResult<T> = Result<T, QuarryError>;

/// Standard exit codes for CLI operations.
///
/// # Exit Code Semantics
///
/// - `0`: Success - operation completed, results found (or no results is acceptable)
/// - `1`: General error - unspecified failure
/// - `2`: Blocking error - critical failure that should halt automation
/// - `3-125`: Specific recoverable errors
/// - `126-255`: Reserved by shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Critical error that should halt automation (code 2)
    BlockingError = 2,

    /// Nothing to work with yet: no index or no passages (code 3)
    NotFound = 3,

    /// Corpus too small for the requested index parameters (code 4)
    InsufficientData = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Index artifacts corrupted or out of sync (code 7)
    IndexCorrupted = 7,

    /// Embedding, store or generation backend failed (code 8)
    ExternalFailure = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// Convert a `QuarryError` to the appropriate exit code.
    pub fn from_error(error: &QuarryError) -> Self {
        match error {
            QuarryError::IndexNotFound { .. } | QuarryError::EmptyStore { .. } => {
                ExitCode::NotFound
            }
            QuarryError::ConfigLoad(_) | QuarryError::InvalidConfig { .. } => {
                ExitCode::ConfigError
            }
            QuarryError::Vector(e) => match e {
                VectorError::InsufficientData { .. } => ExitCode::InsufficientData,
                VectorError::ArtifactMismatch { .. }
                | VectorError::InvalidFormat(_)
                | VectorError::VersionMismatch { .. }
                | VectorError::SlotOutOfRange { .. } => ExitCode::IndexCorrupted,
                VectorError::DimensionMismatch { .. } | VectorError::InvalidConfig(_) => {
                    ExitCode::ConfigError
                }
                VectorError::Storage(_) => ExitCode::IoError,
                VectorError::EmbeddingFailed(_) => ExitCode::ExternalFailure,
                VectorError::NotTrained | VectorError::AlreadyTrained => ExitCode::BlockingError,
                _ => ExitCode::GeneralError,
            },
            QuarryError::Store(StoreError::Io(_)) => ExitCode::IoError,
            QuarryError::Store(StoreError::Corrupted(_)) => ExitCode::IndexCorrupted,
            QuarryError::Store(StoreError::Unavailable(_)) | QuarryError::Generation(_) => {
                ExitCode::ExternalFailure
            }
            QuarryError::Ingest(IngestError::Store(_)) => ExitCode::ExternalFailure,
            QuarryError::Ingest(_) => ExitCode::IoError,
        }
    }

    /// Check if this exit code indicates a blocking error.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    /// Check if this exit code indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Get a human-readable description of the exit code.
    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - automation should halt",
            ExitCode::NotFound => "Not found",
            ExitCode::InsufficientData => "Insufficient data",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::IndexCorrupted => "Index corrupted",
            ExitCode::ExternalFailure => "External service failure",
        }
    }
}
