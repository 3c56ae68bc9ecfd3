//! Ferrodex CLI: create indices, ingest documents, and run queries against
//! an on-disk engine from the command line.
//!
//! ```bash
//! ferrodex-cli --db ./data create-index books
//! ferrodex-cli --db ./data index books --id 1 --source '{"title": "Rust in Action"}'
//! ferrodex-cli --db ./data search books '{"match": {"value": "rust"}}'
//! ```

use clap::{Parser, Subcommand};
use ferrodex::{EngineConfig, Query, SearchEngine};
use std::collections::HashMap;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ferrodex-cli", about = "Embedded full-text search engine CLI", version)]
struct Cli {
    /// Directory the engine persists its key-value store to.
    #[arg(long, default_value = "ferrodex_data")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty index with no field mappings (auto-detected on first ingest).
    CreateIndex { name: String },

    /// List every index and its document count.
    ListIndices,

    /// Delete an index and everything stored under it.
    DeleteIndex { name: String },

    /// Index one JSON document, generating an id if `--id` is omitted.
    Index {
        index: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        source: String,
    },

    /// Fetch one document by id.
    Get { index: String, id: String },

    /// Delete one document by id.
    Delete { index: String, id: String },

    /// Run a query (as JSON: match_all, match, term, wildcard, or bool) and
    /// print ranked hits.
    Search {
        index: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        size: usize,
        #[arg(long, default_value_t = 0)]
        from: usize,
    },

    /// Typo-tolerant term suggestions for a prefix.
    Suggest {
        index: String,
        prefix: String,
        #[arg(long)]
        field: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> ferrodex::Result<()> {
    let engine = SearchEngine::open(EngineConfig::default().with_db_path(cli.db))?;

    match cli.command {
        Commands::CreateIndex { name } => {
            engine.create_index(&name, HashMap::new(), Default::default())?;
            println!("created index '{name}'");
        }
        Commands::ListIndices => {
            for meta in engine.list_indices()? {
                let stats = engine.index_service().stats(&meta.name)?;
                println!("{}\t{} docs", meta.name, stats.total_documents());
            }
        }
        Commands::DeleteIndex { name } => {
            engine.delete_index(&name)?;
            println!("deleted index '{name}'");
        }
        Commands::Index { index, id, source } => {
            let doc: serde_json::Value = serde_json::from_str(&source)
                .map_err(|e| ferrodex::SearchError::BadRequest(format!("invalid JSON source: {e}")))?;
            let response = engine.index_document(&index, id, doc)?;
            println!("{} ({:?})", response.id, response.result);
        }
        Commands::Get { index, id } => match engine.get_document(&index, &id)? {
            Some(doc) => println!("{}", serde_json::to_string_pretty(&doc).unwrap()),
            None => println!("not found"),
        },
        Commands::Delete { index, id } => {
            let existed = engine.delete_document(&index, &id)?;
            println!("{}", if existed { "deleted" } else { "not found" });
        }
        Commands::Search { index, query, size, from } => {
            let parsed = serde_json::from_str(&query)
                .map_err(|e| ferrodex::SearchError::BadQuery(format!("invalid JSON query: {e}")))?;
            let query = Query::from_json(&parsed)?;
            let envelope = engine.search(&index, &query, from, size, None)?;
            println!("{} hits in {}ms (max score {:.3})", envelope.total, envelope.took_ms, envelope.max_score);
            for hit in &envelope.hits {
                println!("  {:.3}  {}  {}", hit.score, hit.id, hit.source);
            }
            for suggestion in &envelope.suggestions {
                println!("  did you mean: {} (edit distance {})", suggestion.text, suggestion.edit_distance);
            }
        }
        Commands::Suggest { index, prefix, field } => {
            for (term, df) in engine.suggest(&index, &prefix, field.as_deref())? {
                println!("{term}\t{df}");
            }
        }
    }
    Ok(())
}
