//! sqlvec-store - Vector similarity search over plain SQLite tables
//!
//! Embeddings are stored one component per row, so cosine similarity can be
//! computed with ordinary joins and `SUM` aggregates instead of a vector
//! column type or extension.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlvec_store::SqliteVectorStore;
//! use sqlvec_core::{Document, SearchRequest, SqlvecConfig, VectorStore};
//!
//! let store = SqliteVectorStore::open("vectors.db", SqlvecConfig::default(), embedder)?;
//! store.add(&[Document::new("hello world")]).await?;
//! let results = store.similarity_search(&SearchRequest::new("hello")).await?;
//! ```

pub mod ingest;
pub mod schema;
pub mod search;
mod sqlite;

#[cfg(test)]
mod testing;

pub use ingest::BatchIngestionPipeline;
pub use schema::TableNames;
pub use search::SimilaritySearchEngine;
pub use sqlite::SqliteVectorStore;
