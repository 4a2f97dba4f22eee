//! # docdex CLI
//!
//! The `docdex` binary drives database setup, one-shot ingestion and
//! queries, maintenance, and the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! docdex --config ./config/docdex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docdex init` | Create the SQLite database and run schema migrations |
//! | `docdex serve` | Start the HTTP/JSON API server |
//! | `docdex ingest <pdf>` | Ingest one PDF from disk |
//! | `docdex query "<question>"` | Ask a question against the index |
//! | `docdex documents` | List ingested documents |
//! | `docdex check` | Report consistency issues |
//! | `docdex cleanup` | Remove orphaned vectors and files |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docdex::{config, db, ingest, maintenance, migrate, query, server, store};

/// docdex — a local-first document question-answering backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docdex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docdex",
    about = "docdex — PDF ingestion, vector retrieval, and LLM answer synthesis",
    version,
    long_about = "docdex ingests PDF documents through a staged pipeline (extract, optional \
    LLM summarization, chunk, embed, store), indexes them for similarity search, and answers \
    questions with source attribution via a CLI and an HTTP/JSON API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent:
    /// running it multiple times is safe.
    Init,

    /// Start the HTTP/JSON API server.
    ///
    /// Runs migrations, then binds to `[server].bind` and serves the upload,
    /// query, documents, upload-state, chat, and maintenance endpoints.
    Serve,

    /// Ingest one PDF from disk.
    Ingest {
        /// Path to the PDF file.
        path: PathBuf,

        /// Skip the LLM summarization stage.
        #[arg(long)]
        no_summarize: bool,
    },

    /// Ask a question against the ingested documents.
    Query {
        /// The question text.
        question: String,

        /// Number of chunks to retrieve (capped by retrieval.top_k_max).
        #[arg(long)]
        top_k: Option<usize>,

        /// Answer without retrieval (no sources).
        #[arg(long)]
        no_rag: bool,
    },

    /// List ingested documents.
    Documents,

    /// Check consistency between document records, vectors, and disk files.
    Check,

    /// Remove orphaned vectors and files detected by the consistency check.
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docdex=info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            store::ensure_dirs(&cfg.storage)?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { path, no_summarize } => {
            let bytes = std::fs::read(&path)?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| anyhow::anyhow!("path has no filename: {}", path.display()))?;

            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            match ingest::ingest(&cfg, &pool, &bytes, &filename, !no_summarize).await {
                Ok(report) => {
                    println!("Ingested {}:", report.filename);
                    println!("  pages: {}", report.pages_processed);
                    println!("  characters: {}", report.characters_extracted);
                    println!("  chunks: {}", report.chunks_created);
                    println!("  summarized: {}", report.summarized);
                    println!("  elapsed: {} ms", report.processing_time_ms);
                }
                Err(e) => {
                    anyhow::bail!("ingestion failed: {}", e);
                }
            }
        }
        Commands::Query {
            question,
            top_k,
            no_rag,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            match query::answer(&cfg, &pool, &question, top_k, !no_rag).await {
                Ok(outcome) => {
                    println!("{}", outcome.answer);
                    if !outcome.sources.is_empty() {
                        println!();
                        println!("Sources:");
                        for source in &outcome.sources {
                            println!(
                                "  {} (chunk {}, similarity {:.3})",
                                source.source_file, source.chunk_index, source.similarity
                            );
                        }
                    }
                }
                Err(e) => {
                    anyhow::bail!("query failed: {}", e);
                }
            }
        }
        Commands::Documents => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            let documents = store::list_documents(&pool).await?;
            if documents.is_empty() {
                println!("No documents ingested.");
            } else {
                println!("documents: {}", documents.len());
                for doc in documents {
                    println!(
                        "  {} — {} pages, {} chunks, {} chars",
                        doc.filename, doc.page_count, doc.chunk_count, doc.character_count
                    );
                }
            }
        }
        Commands::Check => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            let report = maintenance::check_consistency(&cfg, &pool).await?;
            if report.consistent {
                println!("consistent: true");
            } else {
                println!("consistent: false");
                for issue in &report.issues {
                    println!("  [{}] {} ({})", issue.category, issue.description, issue.count);
                    for file in &issue.files {
                        println!("    - {}", file);
                    }
                }
            }
        }
        Commands::Cleanup => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            let report = maintenance::cleanup_orphaned(&cfg, &pool).await?;
            println!("cleaned: {}", report.cleaned_count);
            for file in &report.orphaned_files {
                println!("  - {}", file);
            }
            for err in &report.errors {
                println!("  error: {}", err);
            }
        }
    }

    Ok(())
}
