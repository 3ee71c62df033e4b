//! Configuration module for the retrieval pipeline.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `QUARRY_` and use double
//! underscores to separate nested levels:
//! - `QUARRY_RETRIEVAL__NPROBE=8` sets `retrieval.nprobe`
//! - `QUARRY_INDEX__NBITS=6` sets `index.nbits`
//! - `QUARRY_EMBEDDING__BATCH_SIZE=64` sets `embedding.batch_size`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::QuarryError;
use crate::generate::GenerationOptions;
use crate::vector::{DEFAULT_M, DEFAULT_MAX_ITERATIONS, DEFAULT_NBITS, IndexParams, MAX_NBITS};

/// Name of the per-workspace configuration directory.
pub const CONFIG_DIR: &str = ".quarry";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the index, slot mapping and metadata artifacts
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// JSON file backing the passage store
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Workspace root directory (where .quarry is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Index training parameters
    #[serde(default)]
    pub index: IndexConfig,

    /// Query-time retrieval parameters
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Embedding model settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Document ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Options passed through to the generation backend
    #[serde(default)]
    pub generation: GenerationOptions,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Number of coarse centroids; unset means round(sqrt(N))
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlist: Option<usize>,

    /// Number of sub-quantizers (must divide the embedding dimension)
    #[serde(default = "default_m")]
    pub m: usize,

    /// Bits per sub-code, 1 to 8
    #[serde(default = "default_nbits")]
    pub nbits: u32,

    /// Iteration cap for each k-means run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Worker threads used while training and encoding
    #[serde(default = "default_training_threads")]
    pub training_threads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetrievalConfig {
    /// Passages returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Inverted lists probed per query
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Model to use for embeddings
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts per embedding call during index builds
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Model cache directory; unset means the per-user models directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IngestConfig {
    /// Directory scanned for documents
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Target passage length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters carried over from one passage into the next
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// File extensions to ingest
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".quarry/index")
}
fn default_store_path() -> PathBuf {
    PathBuf::from(".quarry/passages.json")
}
fn default_false() -> bool {
    false
}
fn default_m() -> usize {
    DEFAULT_M
}
fn default_nbits() -> u32 {
    DEFAULT_NBITS
}
fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}
fn default_training_threads() -> usize {
    num_cpus::get()
}
fn default_top_k() -> usize {
    5
}
fn default_nprobe() -> usize {
    1
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_extensions() -> Vec<String> {
    vec!["txt".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            store_path: default_store_path(),
            workspace_root: None,
            debug: false,
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            generation: GenerationOptions::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            nlist: None,
            m: default_m(),
            nbits: default_nbits(),
            max_iterations: default_max_iterations(),
            training_threads: default_training_threads(),
        }
    }
}

impl IndexConfig {
    /// Index parameters for training.
    #[must_use]
    pub fn params(&self) -> IndexParams {
        IndexParams {
            nlist: self.nlist,
            m: self.m,
            nbits: self.nbits,
            max_iterations: self.max_iterations,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            nprobe: default_nprobe(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    /// Configured cache directory, or the shared per-user models directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(models_dir)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            extensions: default_extensions(),
        }
    }
}

/// Shared embedding model cache, `~/.quarry/models`.
pub fn models_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR).join("models"))
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("models"))
}

/// Environment provider: `QUARRY_A__B` sets `a.b`.
fn env_provider() -> Env {
    Env::prefixed("QUARRY_").map(|key| {
        key.as_str()
            .to_lowercase()
            .replace("__", ".") // Double underscore becomes dot
            .into()
    })
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .quarry directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                // If workspace_root is not set in config, detect it
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(env_provider())
    }

    /// Find the workspace config by looking for a .quarry directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .quarry is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Resolves a configured path against the workspace root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Checks values that would only fail later, mid-build.
    pub fn validate(&self) -> Result<(), QuarryError> {
        let invalid = |reason: String| Err(QuarryError::InvalidConfig { reason });

        if self.index.m == 0 {
            return invalid("index.m must be at least 1".to_string());
        }
        if self.index.nbits == 0 || self.index.nbits > MAX_NBITS {
            return invalid(format!(
                "index.nbits must be between 1 and {MAX_NBITS}, got {}",
                self.index.nbits
            ));
        }
        if self.index.nlist == Some(0) {
            return invalid("index.nlist must be at least 1".to_string());
        }
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be at least 1".to_string());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be at least 1".to_string());
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return invalid(format!(
                "ingest.chunk_overlap ({}) must be smaller than ingest.chunk_size ({})",
                self.ingest.chunk_overlap, self.ingest.chunk_size
            ));
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# Quarry Configuration File

# Version of the configuration schema
version = 1

# Directory holding index.ivfpq, mapping.json and metadata.json
index_path = ".quarry/index"

# Passage store written by `quarry ingest`
store_path = ".quarry/passages.json"

# Global debug mode
debug = false

[index]
# Number of coarse centroids. Leave unset for round(sqrt(passage count))
# nlist = 32

# Number of sub-quantizers; must divide the embedding dimension (384)
m = {DEFAULT_M}

# Bits per sub-code (1 to 8). Training needs at least 2^nbits passages
nbits = {DEFAULT_NBITS}

# Iteration cap for k-means
max_iterations = {DEFAULT_MAX_ITERATIONS}

# Worker threads for training (defaults to CPU count)
# training_threads = {threads}

[retrieval]
# Passages per query
top_k = 5

# Inverted lists probed per query; higher is slower and more exact
nprobe = 1

[embedding]
# Model to use for embeddings
model = "AllMiniLML6V2"

# Texts per embedding batch
batch_size = 32

[ingest]
# Directory scanned for documents
data_dir = "data"

# Passage size and overlap, in characters
chunk_size = 1000
chunk_overlap = 200

extensions = ["txt"]

[generation]
max_new_tokens = 150
top_k = 50
top_p = 0.95
do_sample = true
"#,
            threads = num_cpus::get()
        );

        std::fs::write(&config_path, template)?;

        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
        }

        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.index_path, PathBuf::from(".quarry/index"));
        assert_eq!(settings.index.m, 16);
        assert_eq!(settings.index.nbits, 8);
        assert_eq!(settings.index.nlist, None);
        assert!(settings.index.training_threads > 0);
        assert_eq!(settings.retrieval.top_k, 5);
        assert_eq!(settings.retrieval.nprobe, 1);
        assert_eq!(settings.ingest.chunk_size, 1000);
        assert_eq!(settings.ingest.chunk_overlap, 200);
        assert_eq!(settings.generation.max_new_tokens, 150);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[index]
nlist = 12
m = 8
nbits = 6

[retrieval]
nprobe = 4

[ingest]
extensions = ["txt", "md"]
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(
            settings.index.params(),
            IndexParams {
                nlist: Some(12),
                m: 8,
                nbits: 6,
                max_iterations: DEFAULT_MAX_ITERATIONS,
            }
        );
        assert_eq!(settings.retrieval.nprobe, 4);
        // Unspecified values keep their defaults
        assert_eq!(settings.retrieval.top_k, 5);
        assert_eq!(settings.ingest.extensions, vec!["txt", "md"]);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.index.nlist = Some(7);
        settings.retrieval.nprobe = 3;
        settings.embedding.cache_dir = Some(PathBuf::from("/tmp/models"));

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.index.nlist, Some(7));
        assert_eq!(loaded.retrieval.nprobe, 3);
        assert_eq!(loaded.embedding.cache_dir(), PathBuf::from("/tmp/models"));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[embedding]\nbatch_size = 8\nmodel = \"BGESmallENV15\"\n").unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("QUARRY_EMBEDDING__BATCH_SIZE", "64");
            let settings = Settings::load_from(&config_path).unwrap();
            assert_eq!(settings.embedding.batch_size, 64);
            assert_eq!(settings.embedding.model, "BGESmallENV15");
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.index.nbits = 9;
        assert!(matches!(
            settings.validate(),
            Err(QuarryError::InvalidConfig { .. })
        ));

        let mut settings = Settings::default();
        settings.ingest.chunk_overlap = settings.ingest.chunk_size;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.index.nlist = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_resolve_against_workspace_root() {
        let settings = Settings {
            workspace_root: Some(PathBuf::from("/work")),
            ..Settings::default()
        };
        assert_eq!(
            settings.resolve(&settings.index_path),
            PathBuf::from("/work/.quarry/index")
        );
        assert_eq!(
            settings.resolve(Path::new("/abs/data")),
            PathBuf::from("/abs/data")
        );
    }
}
