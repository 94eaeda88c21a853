//! SQLite-backed vector store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use sqlvec_core::{
    DatabaseConfig, DeleteOutcome, Document, Embedder, IngestSummary, Result, SearchRequest,
    SearchResult, SqlvecConfig, Stats, VecError, VectorStore,
};

use crate::ingest::BatchIngestionPipeline;
use crate::schema::{self, TableNames};
use crate::search::SimilaritySearchEngine;

/// Lock the shared connection.
pub(crate) fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| VecError::database(e.to_string()))
}

/// Register the SQL functions the similarity query relies on.
///
/// `SQRT` is only built into SQLite when compiled with math functions,
/// so it is always provided here.
pub(crate) fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "sqrt",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<f64> = ctx.get(0)?;
            Ok(value.filter(|v| *v >= 0.0).map(f64::sqrt))
        },
    )
    .map_err(|e| VecError::database(format!("Failed to register sqrt function: {}", e)))
}

/// Vector store keeping documents and embeddings in plain SQLite tables.
///
/// Database work runs under a blocking Mutex. Embedding calls happen
/// before the connection is locked.
pub struct SqliteVectorStore<E> {
    /// Connection wrapped in blocking Mutex.
    conn: Mutex<Connection>,

    /// Embedding provider.
    embedder: Arc<E>,

    names: TableNames,
    config: SqlvecConfig,
    ingestion: BatchIngestionPipeline,
    search: SimilaritySearchEngine,
}

impl<E: Embedder> SqliteVectorStore<E> {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, config: SqlvecConfig, embedder: Arc<E>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| VecError::database(format!("Failed to open database: {}", e)))?;

        if config.database.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(|e| VecError::database(format!("Failed to enable WAL: {}", e)))?;
        }

        Self::init(conn, config, embedder, path)
    }

    /// Open the database configured in `config.database.path`.
    pub fn open_configured(config: SqlvecConfig, embedder: Arc<E>) -> Result<Self> {
        let path = config.database.path.clone();
        Self::open(path, config, embedder)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(config: SqlvecConfig, embedder: Arc<E>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            VecError::database(format!("Failed to open in-memory database: {}", e))
        })?;

        Self::init(conn, config, embedder, Path::new(":memory:"))
    }

    fn init(conn: Connection, config: SqlvecConfig, embedder: Arc<E>, path: &Path) -> Result<Self> {
        config.validate()?;

        Self::configure_connection(&conn, &config.database)?;
        register_functions(&conn)?;

        let names = TableNames::new(&config.store.schema_name, &config.store.table_name)?;
        let ingestion =
            BatchIngestionPipeline::new(names.clone(), config.store.max_document_batch_size)?;
        let search = SimilaritySearchEngine::new(names.clone());

        let store = Self {
            conn: Mutex::new(conn),
            embedder,
            names,
            config,
            ingestion,
            search,
        };

        let drop_existing = store.config.store.remove_existing_vector_store_table;
        store.init_schema_sync(drop_existing)?;

        info!(
            "Vector store {} opened at {:?}",
            store.names.collection(),
            path
        );

        Ok(store)
    }

    /// Configure SQLite connection.
    fn configure_connection(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
        conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))
            .map_err(|e| VecError::database(format!("Failed to set busy timeout: {}", e)))?;

        conn.execute_batch(
            r#"
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| VecError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    fn init_schema_sync(&self, drop_existing: bool) -> Result<()> {
        if !self.config.store.initialize_schema {
            debug!(
                "Skipping schema initialization for {}",
                self.names.collection()
            );
            return Ok(());
        }
        self.with_conn_mut(|conn| schema::init_schema(conn, &self.names, drop_existing))
    }

    /// Table names of this collection.
    pub fn table_names(&self) -> &TableNames {
        &self.names
    }

    /// Search with a caller-supplied query vector.
    pub fn similarity_search_by_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let top_k = self.clamp_top_k(top_k);
        self.op_span("search_by_vector").in_scope(|| {
            self.with_conn_mut(|conn| self.search.search_by_vector(conn, vector, top_k, None))
        })
    }

    /// Span tagging one store operation with its collection.
    fn op_span(&self, op: &'static str) -> Span {
        info_span!("vector_store", op, collection = %self.names.collection())
    }

    fn clamp_top_k(&self, top_k: usize) -> usize {
        let max_top_k = self.config.search.max_top_k;
        if top_k > max_top_k {
            warn!("top_k {} exceeds maximum {}, clamping", top_k, max_top_k);
            return max_top_k;
        }
        top_k
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = lock(&self.conn)?;
        f(&conn)
    }

    /// Execute a mutable blocking operation on the connection.
    fn with_conn_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = lock(&self.conn)?;
        f(&mut conn)
    }
}

#[async_trait]
impl<E: Embedder> VectorStore for SqliteVectorStore<E> {
    async fn init_schema(&self, drop_existing: bool) -> Result<()> {
        self.op_span("init_schema")
            .in_scope(|| self.init_schema_sync(drop_existing))
    }

    async fn add(&self, documents: &[Document]) -> Result<IngestSummary> {
        self.ingestion
            .add(&self.conn, self.embedder.as_ref(), documents)
            .instrument(self.op_span("add"))
            .await
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<DeleteOutcome> {
        self.op_span("delete").in_scope(|| self.delete_sync(ids))
    }

    async fn similarity_search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let mut request = request.clone();
        let top_k = request.top_k.unwrap_or(self.config.search.default_top_k);
        request.top_k = Some(self.clamp_top_k(top_k));

        self.search
            .search(&self.conn, self.embedder.as_ref(), &request)
            .instrument(self.op_span("search"))
            .await
    }

    async fn stats(&self) -> Result<Stats> {
        self.op_span("stats").in_scope(|| self.stats_sync())
    }
}

impl<E: Embedder> SqliteVectorStore<E> {
    fn delete_sync(&self, ids: &[Uuid]) -> Result<DeleteOutcome> {
        let deleted = self.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| VecError::database(e.to_string()))?;

            let mut deleted = 0;
            {
                let mut content_stmt = tx
                    .prepare(&format!(
                        "DELETE FROM {} WHERE doc_id = ?1",
                        self.names.content()
                    ))
                    .map_err(|e| VecError::database(e.to_string()))?;

                let mut embedding_stmt = tx
                    .prepare(&format!(
                        "DELETE FROM {} WHERE doc_id = ?1",
                        self.names.embeddings()
                    ))
                    .map_err(|e| VecError::database(e.to_string()))?;

                for id in ids {
                    let id = id.to_string();
                    deleted += content_stmt
                        .execute(params![id])
                        .map_err(|e| VecError::database(format!("Failed to delete {}: {}", id, e)))?;
                    embedding_stmt
                        .execute(params![id])
                        .map_err(|e| VecError::database(format!("Failed to delete {}: {}", id, e)))?;
                }
            }

            tx.commit()
                .map_err(|e| VecError::database(e.to_string()))?;
            Ok(deleted)
        })?;

        let outcome = DeleteOutcome {
            requested: ids.len(),
            deleted,
        };

        if outcome.all_deleted() {
            info!("Deleted {} documents from {}", deleted, self.names.collection());
        } else {
            warn!(
                "Deleted {} of {} requested documents from {}",
                deleted,
                ids.len(),
                self.names.collection()
            );
        }

        Ok(outcome)
    }

    fn stats_sync(&self) -> Result<Stats> {
        self.with_conn(|conn| {
            let documents: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", self.names.content()),
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| VecError::database(e.to_string()))?;

            let embedding_rows: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", self.names.embeddings()),
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| VecError::database(e.to_string()))?;

            Ok(Stats {
                collection: self.names.collection().to_string(),
                documents: documents as u64,
                embedding_rows: embedding_rows as u64,
                dimension: schema::established_dimension(conn, &self.names)?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::staging_rows;
    use crate::testing::TableEmbedder;
    use sqlvec_embed::{HashingEmbedder, MockEmbedder};

    fn config() -> SqlvecConfig {
        SqlvecConfig::default()
    }

    fn axis_store() -> (SqliteVectorStore<TableEmbedder>, Vec<Document>) {
        let embedder = TableEmbedder::new(4)
            .with("first", vec![1.0, 0.0, 0.0, 0.0])
            .with("second", vec![0.0, 1.0, 0.0, 0.0])
            .with("third", vec![0.0, 0.0, 1.0, 0.0])
            .with("query first", vec![1.0, 0.0, 0.0, 0.0])
            .with("query second", vec![0.1, 1.0, 0.0, 0.0])
            .with("query third", vec![0.0, 0.3, 1.0, 0.0])
            .with("query mixed", vec![0.5, 0.5, 0.5, 0.0]);
        let store = SqliteVectorStore::open_memory(config(), Arc::new(embedder)).unwrap();
        let docs = vec![
            Document::new("first").with_metadata("n", 1),
            Document::new("second").with_metadata("n", 2),
            Document::new("third").with_metadata("n", 3),
        ];
        (store, docs)
    }

    fn ids(results: &[SearchResult]) -> Vec<Uuid> {
        results.iter().map(|r| r.document.id).collect()
    }

    #[tokio::test]
    async fn test_open_memory() {
        let (store, _) = axis_store();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.collection, "vector_store");
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.dimension, None);
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let (store, docs) = axis_store();
        store.add(&docs).await.unwrap();

        let results = store
            .similarity_search(&SearchRequest::new("query first").with_top_k(2))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.id, docs[0].id);
        assert_eq!(results[0].document.metadata["n"], 1);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results[1].score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_default_top_k() {
        let embedder = TableEmbedder::new(8);
        let store = SqliteVectorStore::open_memory(config(), Arc::new(embedder)).unwrap();
        let docs: Vec<Document> = (0..10).map(|i| Document::new(format!("doc {}", i))).collect();
        store.add(&docs).await.unwrap();

        let results = store
            .similarity_search(&SearchRequest::new("doc 3"))
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn test_configured_default_top_k() {
        let mut config = config();
        config.search.default_top_k = 8;
        let store =
            SqliteVectorStore::open_memory(config, Arc::new(TableEmbedder::new(8))).unwrap();
        let docs: Vec<Document> = (0..20).map(|i| Document::new(format!("doc {}", i))).collect();
        store.add(&docs).await.unwrap();

        let results = store
            .similarity_search(&SearchRequest::new("doc 3"))
            .await
            .unwrap();
        assert_eq!(results.len(), 8);

        let results = store
            .similarity_search(&SearchRequest::new("doc 3").with_top_k(2))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_operations_are_tagged_with_spans() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (store, docs) = axis_store();
        store.add(&docs).await.unwrap();
        store.delete(&[docs[0].id]).await.unwrap();

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|l| l.contains("Deleted 1 documents"))
            .unwrap();
        assert!(line.contains("vector_store{"));
        assert!(line.contains("op=") && line.contains("delete"));
        assert!(line.contains("collection=vector_store"));

        let line = output
            .lines()
            .find(|l| l.contains("Added 3 documents"))
            .unwrap();
        assert!(line.contains("add"));
    }

    #[tokio::test]
    async fn test_top_k_is_clamped() {
        let mut config = config();
        config.search.max_top_k = 2;
        let embedder = TableEmbedder::new(4);
        let store = SqliteVectorStore::open_memory(config, Arc::new(embedder)).unwrap();
        let docs: Vec<Document> = (0..5).map(|i| Document::new(format!("doc {}", i))).collect();
        store.add(&docs).await.unwrap();

        let results = store
            .similarity_search_by_vector(&[1.0, 1.0, 1.0, 1.0], 50)
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_batches_follow_config() {
        let mut config = config();
        config.store.max_document_batch_size = 4;
        let store =
            SqliteVectorStore::open_memory(config, Arc::new(TableEmbedder::new(3))).unwrap();

        let docs: Vec<Document> = (0..9).map(|i| Document::new(format!("doc {}", i))).collect();
        let summary = store.add(&docs).await.unwrap();
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.documents, 9);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 9);
        assert_eq!(stats.embedding_rows, 27);
        assert_eq!(stats.dimension, Some(3));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_reports_counts() {
        let (store, docs) = axis_store();
        store.add(&docs).await.unwrap();

        let outcome = store.delete(&[docs[0].id]).await.unwrap();
        assert_eq!(outcome, DeleteOutcome { requested: 1, deleted: 1 });
        assert!(outcome.all_deleted());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.embedding_rows, 8);

        let results = store
            .similarity_search(&SearchRequest::new("query first").with_top_k(10))
            .await
            .unwrap();
        assert!(!ids(&results).contains(&docs[0].id));
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_ids() {
        let (store, docs) = axis_store();
        store.add(&docs).await.unwrap();

        let outcome = store.delete(&[docs[1].id, Uuid::new_v4()]).await.unwrap();
        assert_eq!(outcome.requested, 2);
        assert_eq!(outcome.deleted, 1);
        assert!(!outcome.all_deleted());

        let outcome = store.delete(&[]).await.unwrap();
        assert!(outcome.all_deleted());
    }

    #[tokio::test]
    async fn test_init_schema_drop_leaves_collection_empty() {
        let (store, docs) = axis_store();
        store.init_schema(true).await.unwrap();
        store.add(&docs).await.unwrap();
        store.init_schema(true).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.embedding_rows, 0);

        let results = store
            .similarity_search(&SearchRequest::new("query first"))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_init_schema_without_drop_keeps_rows() {
        let (store, docs) = axis_store();
        store.add(&docs).await.unwrap();
        store.init_schema(false).await.unwrap();
        assert_eq!(store.stats().await.unwrap().documents, 3);
    }

    #[tokio::test]
    async fn test_initialize_schema_disabled() {
        let mut config = config();
        config.store.initialize_schema = false;
        let store =
            SqliteVectorStore::open_memory(config, Arc::new(TableEmbedder::new(2))).unwrap();

        store.init_schema(true).await.unwrap();
        let err = store.add(&[Document::new("x")]).await.unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn test_custom_table_name() {
        let mut config = config();
        config.store.table_name = "notes".to_string();
        let store =
            SqliteVectorStore::open_memory(config, Arc::new(TableEmbedder::new(2))).unwrap();
        store.add(&[Document::new("x")]).await.unwrap();

        let conn = store.conn.lock().unwrap();
        assert!(schema::table_exists(&conn, "main", "notes").unwrap());
        assert!(schema::table_exists(&conn, "main", "notes_content").unwrap());
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejected() {
        let mut config = config();
        config.store.table_name = "bad name".to_string();
        let result = SqliteVectorStore::open_memory(config, Arc::new(TableEmbedder::new(2)));
        assert!(matches!(result, Err(VecError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_own_content_ranks_first() {
        let store = SqliteVectorStore::open_memory(
            config(),
            Arc::new(HashingEmbedder::new(256)),
        )
        .unwrap();

        let docs = vec![
            Document::new("rust borrow checker lifetimes ownership"),
            Document::new("sourdough bread flour starter oven"),
            Document::new("mountain hiking trail boots summit"),
        ];
        store.add(&docs).await.unwrap();

        for doc in &docs {
            let results = store
                .similarity_search(&SearchRequest::new(doc.content.clone()).with_top_k(3))
                .await
                .unwrap();
            assert_eq!(results[0].document.id, doc.id);
            assert!((results[0].score - 1.0).abs() < 1e-5);
            for other in &results[1..] {
                assert!(results[0].score >= other.score);
            }
        }
    }

    #[tokio::test]
    async fn test_search_provider_failure() {
        let store =
            SqliteVectorStore::open_memory(config(), Arc::new(TableEmbedder::new(2).failing()))
                .unwrap();
        let err = store
            .similarity_search(&SearchRequest::new("q"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_searches_match_baseline() {
        let (store, docs) = axis_store();
        store.add(&docs).await.unwrap();
        let store = Arc::new(store);

        let queries = ["query first", "query second", "query third", "query mixed"];
        let mut baseline = Vec::new();
        for query in queries {
            let results = store
                .similarity_search(&SearchRequest::new(query).with_top_k(3))
                .await
                .unwrap();
            baseline.push(ids(&results));
        }

        let mut handles = Vec::new();
        for round in 0..8 {
            for (i, query) in queries.iter().enumerate() {
                let store = Arc::clone(&store);
                let query = query.to_string();
                handles.push(tokio::spawn(async move {
                    let results = store
                        .similarity_search(&SearchRequest::new(query).with_top_k(3))
                        .await
                        .unwrap();
                    (round, i, ids(&results))
                }));
            }
        }

        for handle in handles {
            let (_, i, result) = handle.await.unwrap();
            assert_eq!(result, baseline[i]);
        }

        let conn = store.conn.lock().unwrap();
        assert_eq!(staging_rows(&conn, store.table_names()), 0);
    }

    #[tokio::test]
    async fn test_every_document_finds_itself() {
        let mut config = config();
        config.store.max_document_batch_size = 7;
        let store =
            SqliteVectorStore::open_memory(config, Arc::new(MockEmbedder::with_dimension(32)))
                .unwrap();

        let docs: Vec<Document> = (0..30)
            .map(|i| Document::new(format!("passage number {}", i)))
            .collect();
        let summary = store.add(&docs).await.unwrap();
        assert_eq!(summary.batches, 5);
        assert_eq!(summary.dimension, 32);

        for doc in &docs {
            let results = store
                .similarity_search(&SearchRequest::new(doc.content.clone()).with_top_k(1))
                .await
                .unwrap();
            assert_eq!(results[0].document.id, doc.id);
            assert!((results[0].score - 1.0).abs() < 1e-4);
        }
    }

    #[tokio::test]
    async fn test_file_database_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let embedder = Arc::new(TableEmbedder::new(2));

        {
            let store = SqliteVectorStore::open(&path, config(), Arc::clone(&embedder)).unwrap();
            store
                .add(&[Document::new("a"), Document::new("b")])
                .await
                .unwrap();
        }

        let mut keep = config();
        keep.store.remove_existing_vector_store_table = false;
        let store = SqliteVectorStore::open(&path, keep, Arc::clone(&embedder)).unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.dimension, Some(2));
        drop(store);

        // Default configuration drops existing tables on open.

        let store = SqliteVectorStore::open(&path, config(), embedder).unwrap();
        assert_eq!(store.stats().await.unwrap().documents, 0);
    }
}
