//! Collection table layout and DDL.
//!
//! A collection named `<name>` is backed by three tables:
//!
//! - `<name>`: one row per embedding component (`doc_id`, `embedding_id`, `embedding`)
//! - `<name>_content`: one row per document (`doc_id`, `text`, `metadata`)
//! - `<name>_query`: a TEMP table staging query vectors during a search

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use sqlvec_core::{Result, VecError};

/// Table name used when the configured name is empty.
pub const DEFAULT_TABLE_NAME: &str = "vector_store";

/// Maximum length of a document's text, enforced by the content table.
pub const MAX_CONTENT_LENGTH: usize = 60000;

/// Maximum length of a document's serialized metadata.
pub const MAX_METADATA_LENGTH: usize = 1024;

/// Fully qualified table names for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    schema: String,
    base: String,
}

impl TableNames {
    /// Derive table names from a schema and a base table name.
    ///
    /// Names are spliced into SQL text, so only plain identifiers are accepted.
    pub fn new(schema_name: &str, table_name: &str) -> Result<Self> {
        let base = match table_name.trim() {
            "" => DEFAULT_TABLE_NAME,
            name => name,
        };
        let schema = match schema_name.trim() {
            "" | "public" => "main",
            name => name,
        };

        for name in [schema, base] {
            if !is_identifier(name) {
                return Err(VecError::invalid_argument(format!(
                    "'{}' is not a valid table or schema name",
                    name
                )));
            }
        }

        Ok(Self {
            schema: schema.to_string(),
            base: base.to_string(),
        })
    }

    /// Collection name (the unqualified embedding table name).
    pub fn collection(&self) -> &str {
        &self.base
    }

    /// SQLite schema holding the persistent tables.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Qualified embedding table.
    pub fn embeddings(&self) -> String {
        format!("{}.{}", self.schema, self.base)
    }

    /// Qualified content table.
    pub fn content(&self) -> String {
        format!("{}.{}_content", self.schema, self.base)
    }

    /// Unqualified name of the query staging table.
    pub fn query_table(&self) -> String {
        format!("{}_query", self.base)
    }

    /// Qualified query staging table.
    pub fn query(&self) -> String {
        format!("temp.{}", self.query_table())
    }

    fn ddl(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.{base}_content (
                doc_id TEXT NOT NULL PRIMARY KEY,
                text TEXT NOT NULL CHECK (length(text) <= {max_len}),
                metadata TEXT NOT NULL DEFAULT '{{}}'
                    CHECK (length(metadata) <= {max_meta})
            );

            CREATE TABLE IF NOT EXISTS {schema}.{base} (
                doc_id TEXT NOT NULL,
                embedding_id INTEGER NOT NULL,
                embedding REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS {schema}.{base}_doc_id_idx ON {base}(doc_id);
            CREATE INDEX IF NOT EXISTS {schema}.{base}_embedding_id_idx ON {base}(embedding_id);
            "#,
            schema = self.schema,
            base = self.base,
            max_len = MAX_CONTENT_LENGTH,
            max_meta = MAX_METADATA_LENGTH,
        )
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Create the collection tables, dropping existing ones first if asked.
pub fn init_schema(conn: &mut Connection, names: &TableNames, drop_existing: bool) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| VecError::database(e.to_string()))?;

    if drop_existing {
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};\nDROP TABLE IF EXISTS {};",
            names.content(),
            names.embeddings()
        ))
        .map_err(|e| VecError::database(format!("Failed to drop collection tables: {}", e)))?;
        debug!("Dropped existing tables for collection {}", names.collection());
    }

    tx.execute_batch(&names.ddl())
        .map_err(|e| VecError::database(format!("Failed to initialize schema: {}", e)))?;

    tx.commit()
        .map_err(|e| VecError::database(e.to_string()))?;

    info!(
        "Initialized schema for collection {} (drop_existing={})",
        names.collection(),
        drop_existing
    );
    Ok(())
}

/// Dimension of the stored vectors, or `None` for an empty collection.
pub fn established_dimension(conn: &Connection, names: &TableNames) -> Result<Option<usize>> {
    let max_id: Option<i64> = conn
        .query_row(
            &format!("SELECT MAX(embedding_id) FROM {}", names.embeddings()),
            [],
            |row| row.get(0),
        )
        .map_err(|e| VecError::database(e.to_string()))?;

    Ok(max_id.map(|id| id as usize + 1))
}

/// Check whether a table exists in the given schema.
pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
                schema
            ),
            params![table],
            |_| Ok(()),
        )
        .optional()
        .map_err(|e| VecError::database(e.to_string()))?;

    Ok(found.is_some())
}
