//! Configuration types for the vector store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, VecError};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqlvecConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Collection layout and ingestion configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// How long a statement waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal_mode: true,
            busy_timeout_ms: 30000,
        }
    }
}

/// Collection layout and ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base table name. The embedding table uses it as is, the content
    /// table adds `_content` and the query staging table adds `_query`.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Schema holding the tables. `public` maps to SQLite's `main`.
    #[serde(default = "default_schema_name")]
    pub schema_name: String,

    /// Maximum documents written per transaction.
    #[serde(default = "default_max_document_batch_size")]
    pub max_document_batch_size: usize,

    /// Create tables on open and allow `init_schema`.
    #[serde(default = "default_true")]
    pub initialize_schema: bool,

    /// Drop existing tables when the schema is initialized on open.
    #[serde(default = "default_true")]
    pub remove_existing_vector_store_table: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            schema_name: default_schema_name(),
            max_document_batch_size: 10000,
            initialize_schema: true,
            remove_existing_vector_store_table: true,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Maximum number of results.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: crate::types::DEFAULT_TOP_K,
            max_top_k: 100,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Vector dimension produced by the embedder.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: 384 }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_table_name() -> String {
    "vector_store".to_string()
}

fn default_schema_name() -> String {
    "public".to_string()
}

fn default_max_document_batch_size() -> usize {
    10000
}

fn default_top_k() -> usize {
    crate::types::DEFAULT_TOP_K
}

fn default_max_top_k() -> usize {
    100
}

fn default_dimension() -> usize {
    384
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sqlvec")
        .join("sqlvec.db")
}

impl SqlvecConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| VecError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sqlvec").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("sqlvec.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Check values that would otherwise fail deep inside an operation.
    pub fn validate(&self) -> Result<()> {
        if self.store.max_document_batch_size == 0 {
            return Err(VecError::config("store.max_document_batch_size must be positive"));
        }
        if self.search.max_top_k == 0 {
            return Err(VecError::config("search.max_top_k must be positive"));
        }
        if self.search.default_top_k == 0 || self.search.default_top_k > self.search.max_top_k {
            return Err(VecError::config(format!(
                "search.default_top_k must be between 1 and {}",
                self.search.max_top_k
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(VecError::config("embedding.dimension must be positive"));
        }
        Ok(())
    }
}
