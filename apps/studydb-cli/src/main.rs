use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use studydb_core::config::Config;
use studydb_core::ingest::{load_text_documents, IngestInput, SourceDocument};
use studydb_hybrid::SessionIndexManager;

#[derive(Debug, Parser)]
#[command(name = "studydb", version, about = "Per-session hybrid retrieval over study material", rename_all = "kebab")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split and index `.txt` files (or directories of them) into a session.
    Index {
        #[arg(long, short = 's')]
        session: String,
        /// Inputs are JSON payloads (`{"documents": [...]}`, a list, or a string).
        #[arg(long, conflicts_with = "chunks")]
        json: bool,
        /// Each non-empty line of the inputs is one pre-split chunk.
        #[arg(long)]
        chunks: bool,
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },
    /// Print the top chunks for a query.
    Query {
        #[arg(long, short = 's')]
        session: String,
        #[arg(long, short = 'k', default_value_t = 5)]
        top_k: usize,
        /// Emit hits as JSON lines.
        #[arg(long)]
        json: bool,
        query: String,
    },
    Delete {
        #[arg(long, short = 's')]
        session: String,
    },
    Info {
        #[arg(long, short = 's')]
        session: String,
    },
    /// List indexed sessions.
    Sessions,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let mut settings = Config::load()?.settings()?;
    if matches!(args.command, Command::Index { .. }) {
        settings.show_progress = true;
    }
    let manager = SessionIndexManager::open(settings)?;

    match args.command {
        Command::Index { session, json, chunks, paths } => {
            let input = if json {
                read_json_inputs(&paths)?
            } else if chunks {
                read_chunk_lines(&paths)?
            } else {
                read_text_inputs(&paths)?
            };
            let manifest = manager.index_input(input, &session)?;
            println!(
                "Indexed {} chunks into session {} (version {}, {})",
                manifest.chunk_count, manifest.session_id, manifest.version, manifest.embedder
            );
        }
        Command::Query { session, top_k, json, query } => {
            let hits = manager.retrieve_hits(&query, top_k, &session)?;
            for (rank, hit) in hits.iter().enumerate() {
                if json {
                    println!("{}", serde_json::to_string(hit)?);
                } else {
                    println!("{}. [#{} score {:.5}] {}", rank + 1, hit.position, hit.score, hit.text);
                }
            }
        }
        Command::Delete { session } => {
            manager.delete(&session)?;
            println!("Deleted session {session}");
        }
        Command::Info { session } => {
            let manifest = manager.session_info(&session)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Command::Sessions => {
            for m in manager.list_sessions()? {
                println!("{}\tv{}\t{} chunks\t{}\t{}", m.session_id, m.version, m.chunk_count, m.embedder, m.created_at);
            }
        }
    }
    Ok(())
}

fn read_text_inputs(paths: &[PathBuf]) -> anyhow::Result<IngestInput> {
    let docs = load_text_documents(paths)?;
    anyhow::ensure!(!docs.is_empty(), "no .txt files found under the given paths");
    tracing::info!(documents = docs.len(), "loaded documents");
    Ok(IngestInput::Documents(docs))
}

fn read_chunk_lines(paths: &[PathBuf]) -> anyhow::Result<IngestInput> {
    let mut chunks = Vec::new();
    for doc in load_text_documents(paths)? {
        chunks.extend(doc.page_content.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string));
    }
    Ok(IngestInput::Chunks(chunks))
}

fn read_json_inputs(paths: &[PathBuf]) -> anyhow::Result<IngestInput> {
    let mut docs = Vec::new();
    for path in paths {
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))?;
        match IngestInput::from_json(value) {
            IngestInput::Text(text) => docs.push(SourceDocument::new(text)),
            IngestInput::Documents(more) => docs.extend(more),
            IngestInput::Chunks(chunks) => docs.extend(chunks.into_iter().map(SourceDocument::new)),
        }
    }
    Ok(IngestInput::Documents(docs))
}
