//! Core traits defining the interfaces between components.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{DeleteOutcome, Document, IngestSummary, SearchRequest, SearchResult, Stats};

/// Embedding provider trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts, one vector per text, in order.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Vector store trait.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection tables, optionally dropping existing ones first.
    async fn init_schema(&self, drop_existing: bool) -> Result<()>;

    /// Embed and persist documents in bounded batches.
    async fn add(&self, documents: &[Document]) -> Result<IngestSummary>;

    /// Delete documents and their embedding rows.
    async fn delete(&self, ids: &[Uuid]) -> Result<DeleteOutcome>;

    /// Return the documents most similar to the query text.
    async fn similarity_search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>>;

    /// Collection statistics.
    async fn stats(&self) -> Result<Stats>;
}
