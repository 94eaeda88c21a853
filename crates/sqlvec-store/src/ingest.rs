//! Batched, transactional document ingestion.

use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use sqlvec_core::{Document, Embedder, IngestSummary, Result, VecError};

use crate::schema::{self, TableNames};
use crate::sqlite::lock;

/// Writes documents and their embeddings in bounded batches.
///
/// Each batch is one transaction. Batches are independent: when a later
/// batch fails, earlier batches stay committed.
#[derive(Debug, Clone)]
pub struct BatchIngestionPipeline {
    names: TableNames,
    max_batch_size: usize,
}

impl BatchIngestionPipeline {
    pub fn new(names: TableNames, max_batch_size: usize) -> Result<Self> {
        if max_batch_size == 0 {
            return Err(VecError::invalid_argument("max batch size must be positive"));
        }
        Ok(Self {
            names,
            max_batch_size,
        })
    }

    /// Embed all documents in one provider call, then write them batch by batch.
    pub async fn add<E>(
        &self,
        conn: &Mutex<Connection>,
        embedder: &E,
        documents: &[Document],
    ) -> Result<IngestSummary>
    where
        E: Embedder + ?Sized,
    {
        if documents.is_empty() {
            return Ok(IngestSummary {
                documents: 0,
                batches: 0,
                dimension: 0,
            });
        }

        let texts: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let embeddings = embedder.embed_documents(&texts).await?;

        if embeddings.len() != documents.len() {
            return Err(VecError::embedding(format!(
                "provider returned {} embeddings for {} documents",
                embeddings.len(),
                documents.len()
            )));
        }

        let dimension = {
            let conn = lock(conn)?;
            let established = schema::established_dimension(&conn, &self.names)?;
            check_dimensions(&embeddings, established)?
        };

        let doc_batches = partition(documents, self.max_batch_size);
        let vec_batches = partition(&embeddings, self.max_batch_size);
        let total = doc_batches.len();

        for (i, (docs, vectors)) in doc_batches.into_iter().zip(vec_batches).enumerate() {
            let mut conn = lock(conn)?;
            write_batch(&mut conn, &self.names, docs, vectors)?;
            debug!("Committed batch {}/{} ({} documents)", i + 1, total, docs.len());
        }

        info!(
            "Added {} documents to {} in {} batches",
            documents.len(),
            self.names.collection(),
            total
        );

        Ok(IngestSummary {
            documents: documents.len(),
            batches: total,
            dimension,
        })
    }
}

/// Split items into contiguous batches of at most `max_batch_size`.
pub fn partition<T>(items: &[T], max_batch_size: usize) -> Vec<&[T]> {
    items.chunks(max_batch_size.max(1)).collect()
}

/// Check that every vector has the same, non-zero length, matching the
/// established collection dimension if there is one. Returns that length.
pub fn check_dimensions(embeddings: &[Vec<f32>], established: Option<usize>) -> Result<usize> {
    let expected = match (established, embeddings.first()) {
        (Some(dimension), _) => dimension,
        (None, Some(first)) => first.len(),
        (None, None) => return Ok(0),
    };

    if expected == 0 {
        return Err(VecError::invalid_argument("embedding vectors must not be empty"));
    }

    match embeddings.iter().find(|v| v.len() != expected) {
        Some(bad) => Err(VecError::DimensionMismatch {
            expected,
            actual: bad.len(),
        }),
        None => Ok(expected),
    }
}

/// Write one batch in a single transaction: a content row per document and
/// one embedding row per vector component.
///
/// The established dimension is read inside the transaction, so the check
/// and the inserts see the same collection state.
pub fn write_batch(
    conn: &mut Connection,
    names: &TableNames,
    documents: &[Document],
    embeddings: &[Vec<f32>],
) -> Result<()> {
    let metadata = documents
        .iter()
        .map(|doc| serde_json::to_string(&doc.metadata))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let tx = conn
        .transaction()
        .map_err(|e| VecError::database(e.to_string()))?;

    let established = schema::established_dimension(&tx, names)?;
    check_dimensions(embeddings, established)?;

    {
        let mut content_stmt = tx
            .prepare(&format!(
                "INSERT INTO {} (doc_id, text, metadata) VALUES (?1, ?2, ?3)",
                names.content()
            ))
            .map_err(|e| VecError::database(e.to_string()))?;

        let mut embedding_stmt = tx
            .prepare(&format!(
                "INSERT INTO {} (doc_id, embedding_id, embedding) VALUES (?1, ?2, ?3)",
                names.embeddings()
            ))
            .map_err(|e| VecError::database(e.to_string()))?;

        for ((doc, metadata), vector) in documents.iter().zip(&metadata).zip(embeddings) {
            let doc_id = doc.id.to_string();

            content_stmt
                .execute(params![doc_id, doc.content, metadata])
                .map_err(|e| {
                    VecError::database(format!("Failed to insert document {}: {}", doc_id, e))
                })?;

            for (i, value) in vector.iter().enumerate() {
                embedding_stmt
                    .execute(params![doc_id, i as i64, *value as f64])
                    .map_err(|e| {
                        VecError::database(format!("Failed to insert embedding row: {}", e))
                    })?;
            }
        }
    }

    tx.commit()
        .map_err(|e| VecError::database(e.to_string()))?;

    Ok(())
}
