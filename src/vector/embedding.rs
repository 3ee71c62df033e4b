//! Embedding generation for passages and queries.
//!
//! The index only sees fixed-dimension `f32` vectors. Producing them is the
//! job of an [`EmbeddingGenerator`]; the default implementation runs a
//! fastembed sentence-transformer locally.

use std::path::PathBuf;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::vector::{VectorDimension, VectorError};

/// Trait for generating embeddings from text.
///
/// Implementations must be deterministic for a given model: the same text
/// always yields the same vector, or stored codes stop matching queries.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts, one vector per input in order.
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Generate the embedding of a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.embed_many(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| VectorError::EmbeddingFailed("model returned no embedding".to_string()))
    }

    /// Dimension of the vectors this generator produces.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Model name recorded in index metadata.
    fn model_name(&self) -> String;
}

/// Parses a model name from configuration into a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        "ParaphraseMLMiniLML12V2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
        other => Err(VectorError::InvalidConfig(format!(
            "unknown embedding model '{other}' (supported: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small, ParaphraseMLMiniLML12V2)"
        ))),
    }
}

/// fastembed-backed generator.
///
/// The ONNX session is not shareable across threads, so calls are
/// serialized through a mutex.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: VectorDimension,
}

impl std::fmt::Debug for FastEmbedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedGenerator")
            .field("model", &self.model_name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedGenerator {
    /// Loads `model_name`, downloading it into `cache_dir` on first use.
    ///
    /// # Errors
    /// `InvalidConfig` for an unknown model name, `EmbeddingFailed` if the
    /// model cannot be initialized.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_embedding_model(model_name)?;

        info!(model = model_name, cache_dir = %cache_dir.display(), "loading embedding model");
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        // Dimension is probed rather than hard-coded per model
        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;
        let dimension = probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| VectorError::EmbeddingFailed("model returned no embedding".to_string()))?;

        Ok(Self {
            model: Mutex::new(text_model),
            model_name: model_name.to_string(),
            dimension: VectorDimension::new(dimension)?,
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .model
            .lock()
            .embed(texts.to_vec(), None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }
        debug!(count = embeddings.len(), "generated embeddings");

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}

/// Mock embedding generator for testing.
///
/// Hashes each lowercase word into one of `dimension` buckets and
/// normalizes, so texts sharing words land close together.
#[cfg(test)]
pub struct MockEmbeddingGenerator {
    dimension: VectorDimension,
}

#[cfg(test)]
impl MockEmbeddingGenerator {
    #[must_use]
    pub fn with_dimension(dimension: VectorDimension) -> Self {
        Self { dimension }
    }
}

#[cfg(test)]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let dim = self.dimension.get();
        Ok(texts
            .iter()
            .map(|text| {
                let mut embedding = vec![0.0f32; dim];
                for word in text.split_whitespace() {
                    let hash = word
                        .to_lowercase()
                        .bytes()
                        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                            (h ^ u64::from(b)).wrapping_mul(0x100_0000_01b3)
                        });
                    embedding[(hash % dim as u64) as usize] += 1.0;
                }
                let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
                if magnitude > 0.0 {
                    for val in &mut embedding {
                        *val /= magnitude;
                    }
                }
                embedding
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_embeddings_are_deterministic_and_normalized() {
        let generator = MockEmbeddingGenerator::with_dimension(VectorDimension::new(32).unwrap());

        let texts = ["the quick brown fox", "the quick brown fox", "lazy dog"];
        let embeddings = generator.embed_many(&texts).unwrap();

        assert_eq!(embeddings.len(), 3);
        assert_eq!(embeddings[0], embeddings[1]);
        for embedding in &embeddings {
            assert_eq!(embedding.len(), 32);
            let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((magnitude - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_single_embed_uses_batch_path() {
        let generator = MockEmbeddingGenerator::with_dimension(VectorDimension::new(16).unwrap());
        let single = generator.embed("hello world").unwrap();
        let batch = generator.embed_many(&["hello world"]).unwrap();
        assert_eq!(single, batch[0]);
    }

    #[test]
    fn test_parse_embedding_model() {
        assert!(matches!(
            parse_embedding_model("AllMiniLML6V2"),
            Ok(EmbeddingModel::AllMiniLML6V2)
        ));
        assert!(matches!(
            parse_embedding_model("NoSuchModel"),
            Err(VectorError::InvalidConfig(_))
        ));
    }
}
