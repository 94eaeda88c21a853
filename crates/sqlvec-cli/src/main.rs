//! sqlvec CLI - Command-line interface for the sqlvec vector store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use sqlvec_core::{Document, SearchRequest, SqlvecConfig, VectorStore};
use sqlvec_embed::HashingEmbedder;
use sqlvec_store::SqliteVectorStore;

/// sqlvec - vector similarity search on plain SQL tables
#[derive(Parser)]
#[command(name = "sqlvec")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: user config dir, then ./sqlvec.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the collection tables
    Init {
        /// Keep existing tables and rows
        #[arg(long)]
        keep: bool,
    },

    /// Add documents from a JSON Lines file
    ///
    /// Each line is an object with `content`, and optionally `id` and `metadata`.
    Add {
        /// Path to the .jsonl file
        path: PathBuf,
    },

    /// Search the collection
    Search {
        /// Search query
        query: String,

        /// Maximum number of results (default from config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum similarity score
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Delete documents by id
    Delete {
        /// Document ids
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },

    /// Show collection statistics
    Stats,
}

/// One line of an input file.
#[derive(Debug, Deserialize)]
struct DocumentRecord {
    id: Option<Uuid>,
    content: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

impl From<DocumentRecord> for Document {
    fn from(record: DocumentRecord) -> Self {
        let mut doc = Document::new(record.content);
        if let Some(id) = record.id {
            doc.id = id;
        }
        doc.metadata = record.metadata;
        doc
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(cli: &Cli) -> Result<SqlvecConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SqlvecConfig::load(path)?,
        None => SqlvecConfig::load_default()?,
    };

    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }

    // Only `init` may drop an existing collection.
    match cli.command {
        Commands::Init { keep } => config.store.remove_existing_vector_store_table = !keep,
        _ => config.store.remove_existing_vector_store_table = false,
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(&cli)?;
    debug!("Using database {:?}", config.database.path);

    let embedder = Arc::new(HashingEmbedder::new(config.embedding.dimension));
    let store = SqliteVectorStore::open_configured(config, embedder)?;

    match cli.command {
        Commands::Init { keep } => {
            // Opening the store already ran the schema initialization.
            let verb = if keep { "Initialized" } else { "Reset" };
            println!(
                "{} collection '{}'",
                verb,
                store.table_names().collection()
            );
        }
        Commands::Add { path } => {
            let documents = read_documents(&path)?;
            let summary = store.add(&documents).await?;
            println!(
                "Added {} documents in {} batch(es), dimension {}",
                summary.documents, summary.batches, summary.dimension
            );
        }
        Commands::Search {
            query,
            top_k,
            threshold,
        } => {
            let mut request = SearchRequest::new(query);
            request.top_k = top_k;
            request.similarity_threshold = threshold;

            let results = store.similarity_search(&request).await?;
            if results.is_empty() {
                println!("No results");
            }
            for result in results {
                println!(
                    "{:>3}. [{:.4}] {} {}",
                    result.rank,
                    result.score,
                    result.document.id,
                    serde_json::to_string(&result.document.metadata)?
                );
                println!("     {}", preview(&result.document.content, 160));
            }
        }
        Commands::Delete { ids } => {
            let outcome = store.delete(&ids).await?;
            println!("Deleted {} of {} documents", outcome.deleted, outcome.requested);
            if !outcome.all_deleted() {
                std::process::exit(1);
            }
        }
        Commands::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

fn read_documents(path: &Path) -> Result<Vec<Document>, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    parse_documents(&content)
}

fn parse_documents(content: &str) -> Result<Vec<Document>, Box<dyn std::error::Error>> {
    let mut documents = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: DocumentRecord = serde_json::from_str(line)
            .map_err(|e| format!("line {}: {}", i + 1, e))?;
        documents.push(record.into());
    }
    Ok(documents)
}

/// First `max_chars` characters of a text on a single line.
fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
