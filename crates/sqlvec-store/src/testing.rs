//! Test helpers shared by the store modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rusqlite::Connection;

use sqlvec_core::{Embedder, Result, VecError};

/// Embedder backed by a lookup table.
///
/// Unknown texts map to a one-hot vector chosen from the text bytes, so
/// every text gets a non-zero vector of the configured dimension.
pub struct TableEmbedder {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    failing: bool,
    calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
            failing: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.vectors.get(text) {
            return vector.clone();
        }
        let slot = text.bytes().map(usize::from).sum::<usize>() % self.dimension;
        let mut vector = vec![0.0; self.dimension];
        vector[slot] = 1.0;
        vector
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(VecError::embedding("provider unavailable"));
        }
        Ok(texts.iter().map(|t| self.lookup(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(VecError::embedding("provider unavailable"));
        }
        Ok(self.lookup(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}
