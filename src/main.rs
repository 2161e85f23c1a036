//! # strata CLI
//!
//! The `strata` binary drives the ingestion and Q&A pipeline. It provides
//! commands for database initialization, per-document ingestion and
//! deletion, retrieval, conversational Q&A, and corpus statistics.
//!
//! ## Usage
//!
//! ```bash
//! strata --config ./config/strata.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `strata init` | Create the SQLite database and run schema migrations |
//! | `strata ingest <id> <file>` | Parse, chunk, embed, and store one document |
//! | `strata delete <id>` | Delete a document's vectors and chunks |
//! | `strata search "<query>"` | Retrieve ranked chunks for a query |
//! | `strata ask "<query>"` | Answer a question over the corpus |
//! | `strata stats` | Show corpus statistics |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use strata::chunker::HierarchicalChunker;
use strata::config::{self, Config};
use strata::db;
use strata::embedding::create_embedder;
use strata::index::SqliteVectorIndex;
use strata::llm::OpenAiChatClient;
use strata::migrate;
use strata::models::ConversationTurn;
use strata::parser::{DocumentParser, FlatFileReader, LayoutParserClient};
use strata::pipeline::IngestionPipeline;
use strata::progress::{HttpStatusSink, NullSink, Operation, ProgressTracker, StatusSink};
use strata::qa::ConversationOrchestrator;
use strata::retrieval::RetrievalEngine;
use strata::stats;
use strata::store::SqliteStore;

/// strata — hierarchical document ingestion, retrieval, and Q&A.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/strata.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "strata",
    about = "Hierarchical document ingestion, retrieval, and conversational Q&A",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/strata.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, vectors, conversation_turns). Idempotent.
    Init,

    /// Ingest one document: parse, chunk hierarchically, embed, and store.
    ///
    /// Progress is reported stage by stage to the configured status
    /// endpoint; the final report carries the full chunk payload.
    Ingest {
        /// Document identifier (used for chunk ids and cascade deletion).
        document_id: String,

        /// Path to the source file (pdf, html, docx, ppt, md via the
        /// layout parser; csv and plain text via the flat reader).
        file: PathBuf,

        /// Task identifier for status reports. Generated when omitted.
        #[arg(long)]
        task_id: Option<String>,
    },

    /// Delete a document's vectors and stored chunks.
    Delete {
        /// Document identifier.
        document_id: String,

        /// Task identifier for status reports. Generated when omitted.
        #[arg(long)]
        task_id: Option<String>,
    },

    /// Retrieve ranked chunks for a query.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict the search to one document.
        #[arg(long)]
        document: Option<String>,

        /// Restrict the search to one file type (e.g. `.pdf`).
        #[arg(long)]
        file_type: Option<String>,
    },

    /// Answer a question over the corpus with retrieval-augmented Q&A.
    Ask {
        /// The question.
        query: String,

        /// Conversation session id. With a session, prior turns feed the
        /// query rewrite and the exchange is recorded.
        #[arg(long)]
        session: Option<String>,
    },

    /// Show corpus statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strata=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            document_id,
            file,
            task_id,
        } => {
            cmd_ingest(&cfg, &document_id, &file, task_id).await?;
        }
        Commands::Delete {
            document_id,
            task_id,
        } => {
            cmd_delete(&cfg, &document_id, task_id).await?;
        }
        Commands::Search {
            query,
            top_k,
            document,
            file_type,
        } => {
            cmd_search(&cfg, &query, top_k, document, file_type).await?;
        }
        Commands::Ask { query, session } => {
            cmd_ask(&cfg, &query, session).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

fn status_sink(cfg: &Config) -> Arc<dyn StatusSink> {
    if cfg.status.base_url.is_empty() {
        Arc::new(NullSink)
    } else {
        Arc::new(HttpStatusSink::new(
            &cfg.status.base_url,
            cfg.status.timeout_secs,
        ))
    }
}

fn build_pipeline(cfg: &Config, pool: sqlx::SqlitePool) -> Result<IngestionPipeline> {
    let parser: Arc<dyn DocumentParser> = if cfg.parser.ingestor_url.is_empty() {
        // No layout service configured: everything takes the flat path.
        Arc::new(FlatFileReader)
    } else {
        Arc::new(LayoutParserClient::new(&cfg.parser)?)
    };

    Ok(IngestionPipeline::new(
        parser,
        Arc::new(FlatFileReader),
        HierarchicalChunker::from_config(&cfg.chunking)?,
        Arc::from(create_embedder(&cfg.embedding)?),
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        Arc::new(SqliteStore::new(pool)),
        cfg.embedding.batch_size,
    ))
}

async fn cmd_ingest(
    cfg: &Config,
    document_id: &str,
    file: &PathBuf,
    task_id: Option<String>,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("file not found: {}", file.display());
    }

    let pool = db::connect(cfg).await?;
    let pipeline = build_pipeline(cfg, pool.clone())?;
    let task_id = task_id.unwrap_or_else(|| format!("task_{}", Uuid::new_v4()));
    let tracker = ProgressTracker::new(
        status_sink(cfg),
        document_id.to_string(),
        task_id,
        Operation::Ingestion,
    );

    let chunks = pipeline.ingest(document_id, file, &tracker).await?;

    println!("ingest {document_id}");
    println!("  file: {}", file.display());
    println!("  chunks: {chunks}");
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn cmd_delete(cfg: &Config, document_id: &str, task_id: Option<String>) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let pipeline = build_pipeline(cfg, pool.clone())?;
    let task_id = task_id.unwrap_or_else(|| format!("delete_{document_id}"));
    let tracker = ProgressTracker::new(
        status_sink(cfg),
        document_id.to_string(),
        task_id,
        Operation::Deletion,
    );

    let deleted = pipeline.delete(document_id, &tracker).await?;

    println!("delete {document_id}");
    println!("  vectors deleted: {deleted}");
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn cmd_search(
    cfg: &Config,
    query: &str,
    top_k: Option<usize>,
    document: Option<String>,
    file_type: Option<String>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(cfg).await?;
    let engine = RetrievalEngine::new(
        Arc::from(create_embedder(&cfg.embedding)?),
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        Arc::new(SqliteStore::new(pool.clone())),
        cfg.retrieval.top_k,
    );

    let results = engine
        .search_filtered(
            query,
            top_k.unwrap_or(cfg.retrieval.top_k),
            document.as_deref(),
            file_type.as_deref(),
        )
        .await?;

    if results.is_empty() {
        println!("No results.");
    } else {
        for (i, result) in results.iter().enumerate() {
            println!(
                "{}. [{:.3}] {} / chunk {}",
                i + 1,
                result.rerank_score,
                result.filename,
                result.chunk_index
            );
            if let Some(page) = result.page_number {
                println!("    page: {page}");
            }
            let excerpt: String = result.content.chars().take(240).collect();
            println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
            println!("    id: {}", result.chunk_id);
            println!();
        }
    }

    pool.close().await;
    Ok(())
}

async fn cmd_ask(cfg: &Config, query: &str, session: Option<String>) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let engine = Arc::new(RetrievalEngine::new(
        Arc::from(create_embedder(&cfg.embedding)?),
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        store.clone(),
        cfg.retrieval.top_k,
    ));
    let llm = Arc::new(OpenAiChatClient::new(&cfg.llm)?);
    let orchestrator =
        ConversationOrchestrator::new(engine, llm, cfg.retrieval.max_context_length);

    let (session_id, history) = match &session {
        Some(id) => (id.clone(), store.recent_turns(id, 10).await?),
        None => (format!("adhoc-{}", Uuid::new_v4()), Vec::new()),
    };

    let outcome = orchestrator.process_query(query, &session_id, &history).await;

    // Persist the exchange only for named sessions.
    if session.is_some() {
        store
            .append_turn(&session_id, &ConversationTurn::user(query))
            .await?;
        let mut assistant = ConversationTurn::assistant(outcome.answer.clone());
        assistant
            .metadata
            .insert("confidence".into(), serde_json::json!(outcome.confidence));
        assistant.metadata.insert(
            "sources".into(),
            serde_json::to_value(&outcome.sources).unwrap_or_default(),
        );
        assistant.metadata.insert(
            "reasoning_steps".into(),
            serde_json::json!(outcome.reasoning_steps),
        );
        store.append_turn(&session_id, &assistant).await?;
    }

    println!("{}", outcome.answer);
    println!();
    println!("confidence: {:.2}", outcome.confidence);
    println!("time: {:.2}s", outcome.processing_time_secs);
    if !outcome.sources.is_empty() {
        println!("sources:");
        for source in &outcome.sources {
            println!(
                "  - {} chunk {} (score {:.3})",
                source.filename, source.chunk_index, source.score
            );
        }
    }
    println!("reasoning:");
    for step in &outcome.reasoning_steps {
        println!("  - {step}");
    }

    pool.close().await;
    Ok(())
}
