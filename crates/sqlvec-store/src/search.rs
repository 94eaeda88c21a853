//! Cosine similarity search expressed as SQL aggregation.
//!
//! The query vector is staged one component per row in a TEMP table, tagged
//! with a fresh search id. Joining the staging rows to the embedding table on
//! `embedding_id` and grouping by `doc_id` yields the dot product and both
//! norms as plain `SUM` aggregates:
//!
//! ```text
//! score = SUM(q * e) / (SQRT(SUM(q * q)) * SQRT(SUM(e * e)))
//! ```
//!
//! Staging, scoring and cleanup share one transaction. Staging rows are
//! deleted before the transaction ends on every path.

use std::sync::Mutex;

use rusqlite::{params, Connection, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use sqlvec_core::{
    Document, Embedder, Result, SearchRequest, SearchResult, VecError, DEFAULT_TOP_K,
};

use crate::schema::{self, TableNames};
use crate::sqlite::lock;

/// A scored row before metadata decoding.
struct ScoredRow {
    doc_id: String,
    score: f64,
    text: String,
    metadata: String,
}

/// Runs similarity searches against one collection.
#[derive(Debug, Clone)]
pub struct SimilaritySearchEngine {
    names: TableNames,
}

impl SimilaritySearchEngine {
    pub fn new(names: TableNames) -> Self {
        Self { names }
    }

    /// Embed the request's query text and search with the resulting vector.
    ///
    /// A provider failure returns before any table is touched.
    pub async fn search<E>(
        &self,
        conn: &Mutex<Connection>,
        embedder: &E,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>>
    where
        E: Embedder + ?Sized,
    {
        let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 {
            return Err(VecError::invalid_argument("top_k must be positive"));
        }

        let vector = embedder.embed_query(&request.query).await?;

        let mut conn = lock(conn)?;
        self.search_by_vector(&mut conn, &vector, top_k, request.similarity_threshold)
    }

    /// Return the `top_k` documents most similar to `vector`, best first.
    pub fn search_by_vector(
        &self,
        conn: &mut Connection,
        vector: &[f32],
        top_k: usize,
        similarity_threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(VecError::invalid_argument("top_k must be positive"));
        }
        if vector.is_empty() {
            return Err(VecError::invalid_argument("query vector must not be empty"));
        }

        let tx = conn
            .transaction()
            .map_err(|e| VecError::database(e.to_string()))?;

        let dimension = match schema::established_dimension(&tx, &self.names)? {
            Some(dimension) => dimension,
            None => {
                debug!("Collection {} is empty", self.names.collection());
                return Ok(Vec::new());
            }
        };
        if vector.len() != dimension {
            return Err(VecError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let search_id = Uuid::new_v4().to_string();

        // A failure here drops `tx`, which rolls the staging rows back.
        self.stage_query(&tx, &search_id, vector)?;

        let outcome = self
            .score(&tx, &search_id, top_k, similarity_threshold)
            .and_then(decode_rows);
        let cleanup = self.clear_staging(&tx, &search_id);

        match (outcome, cleanup) {
            (Ok(results), Ok(())) => {
                tx.commit()
                    .map_err(|e| VecError::database(e.to_string()))?;
                debug!(
                    "Search {} returned {} results from {}",
                    search_id,
                    results.len(),
                    self.names.collection()
                );
                Ok(results)
            }
            (Err(e), _) | (Ok(_), Err(e)) => {
                if let Err(rollback) = tx.rollback() {
                    warn!("Failed to roll back search {}: {}", search_id, rollback);
                }
                Err(e)
            }
        }
    }

    /// Create the staging table if needed and insert one row per component.
    fn stage_query(&self, tx: &Transaction<'_>, search_id: &str, vector: &[f32]) -> Result<()> {
        tx.execute_batch(&format!(
            r#"
            CREATE TEMP TABLE IF NOT EXISTS {} (
                search_id TEXT NOT NULL,
                embedding_id INTEGER NOT NULL,
                embedding REAL NOT NULL
            );
            "#,
            self.names.query_table()
        ))
        .map_err(|e| VecError::database(format!("Failed to create staging table: {}", e)))?;

        let mut stmt = tx
            .prepare(&format!(
                "INSERT INTO {} (search_id, embedding_id, embedding) VALUES (?1, ?2, ?3)",
                self.names.query()
            ))
            .map_err(|e| VecError::database(e.to_string()))?;

        for (i, value) in vector.iter().enumerate() {
            stmt.execute(params![search_id, i as i64, *value as f64])
                .map_err(|e| VecError::database(format!("Failed to stage query vector: {}", e)))?;
        }

        Ok(())
    }

    fn score(
        &self,
        tx: &Transaction<'_>,
        search_id: &str,
        top_k: usize,
        similarity_threshold: Option<f32>,
    ) -> Result<Vec<ScoredRow>> {
        // Zero-norm vectors have no defined cosine, so HAVING drops them
        // instead of letting the division produce NULL.
        let sql = format!(
            r#"
            SELECT s.doc_id, s.score, c.text, c.metadata
            FROM (
                SELECT e.doc_id AS doc_id,
                       SUM(q.embedding * e.embedding) /
                           (SQRT(SUM(q.embedding * q.embedding)) *
                            SQRT(SUM(e.embedding * e.embedding))) AS score
                FROM {query} q
                INNER JOIN {embeddings} e ON q.embedding_id = e.embedding_id
                WHERE q.search_id = ?1
                GROUP BY e.doc_id
                HAVING SUM(q.embedding * q.embedding) > 0
                   AND SUM(e.embedding * e.embedding) > 0
                ORDER BY score DESC, e.doc_id
                LIMIT ?2
            ) s
            INNER JOIN {content} c ON c.doc_id = s.doc_id
            WHERE ?3 IS NULL OR s.score >= ?3
            ORDER BY s.score DESC, s.doc_id
            "#,
            query = self.names.query(),
            embeddings = self.names.embeddings(),
            content = self.names.content(),
        );

        let mut stmt = tx
            .prepare(&sql)
            .map_err(|e| VecError::database(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![search_id, top_k as i64, similarity_threshold.map(f64::from)],
                |row| {
                    Ok(ScoredRow {
                        doc_id: row.get(0)?,
                        score: row.get(1)?,
                        text: row.get(2)?,
                        metadata: row.get(3)?,
                    })
                },
            )
            .map_err(|e| VecError::database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VecError::database(e.to_string()))?;

        Ok(rows)
    }

    fn clear_staging(&self, tx: &Transaction<'_>, search_id: &str) -> Result<()> {
        tx.execute(
            &format!("DELETE FROM {} WHERE search_id = ?1", self.names.query()),
            params![search_id],
        )
        .map_err(|e| VecError::database(format!("Failed to clear staging rows: {}", e)))?;
        Ok(())
    }
}

/// Decode metadata and ids. Any malformed row fails the whole search.
fn decode_rows(rows: Vec<ScoredRow>) -> Result<Vec<SearchResult>> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| -> Result<SearchResult> {
            let id = Uuid::parse_str(&row.doc_id).map_err(|e| {
                VecError::database(format!("Invalid doc_id {:?}: {}", row.doc_id, e))
            })?;
            let metadata = serde_json::from_str(&row.metadata)?;

            Ok(SearchResult {
                rank: i as u32 + 1,
                score: (row.score as f32).clamp(-1.0, 1.0),
                document: Document {
                    id,
                    content: row.text,
                    metadata,
                    embedding: None,
                },
            })
        })
        .collect()
}

/// Number of staging rows currently held by this connection.
#[cfg(test)]
pub(crate) fn staging_rows(conn: &Connection, names: &TableNames) -> i64 {
    if !schema::table_exists(conn, "temp", &names.query_table()).unwrap() {
        return 0;
    }
    crate::testing::count_rows(conn, &names.query())
}
