//! Core domain types for the vector store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Default number of results returned by a similarity search.
pub const DEFAULT_TOP_K: usize = 4;

/// A document stored in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: Uuid,

    /// Free-text content.
    pub content: String,

    /// User-provided metadata, stored as a JSON object.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Embedding vector, if one has been computed for this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Create a new document with a random id and no metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            metadata: HashMap::new(),
            embedding: None,
        }
    }

    /// Replace the document id.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A similarity search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text, embedded by the store's embedder.
    pub query: String,

    /// Maximum number of results. `None` uses the store's configured default.
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Minimum cosine score a result must reach.
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
}

impl SearchRequest {
    /// Create a request with the default top-k and no threshold.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
            similarity_threshold: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }
}

/// A search result with score and document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result rank (1-indexed).
    pub rank: u32,

    /// Cosine similarity in [-1, 1] (higher is better).
    pub score: f32,

    /// The matched document, without its embedding.
    pub document: Document,
}

/// Outcome of an `add` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Number of documents written.
    pub documents: usize,

    /// Number of batch transactions committed.
    pub batches: usize,

    /// Embedding dimension of the written documents.
    pub dimension: usize,
}

/// Outcome of a `delete` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// Number of ids the caller asked to delete.
    pub requested: usize,

    /// Number of documents actually removed.
    pub deleted: usize,
}

impl DeleteOutcome {
    /// True when every requested id was present and removed.
    pub fn all_deleted(&self) -> bool {
        self.deleted == self.requested
    }
}

/// Statistics about a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Collection (embedding table) name.
    pub collection: String,

    /// Number of content rows.
    pub documents: u64,

    /// Number of embedding rows.
    pub embedding_rows: u64,

    /// Established embedding dimension, if any document is stored.
    pub dimension: Option<usize>,
}
