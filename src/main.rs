// Copyright 2026 Chequeflow Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use chequeflow::cli;
use chequeflow::intercept::ContentTypeToken;
use chequeflow::store::ChequeRepo;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "chequeflow",
    about = "Chequeflow — capture, collect, and reconcile fiscal cheque records",
    version,
    after_help = "Run 'chequeflow <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Database file (defaults to $CHEQUEFLOW_DB or ~/.chequeflow/cheques.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage cheque collections
    Collections {
        #[command(subcommand)]
        action: CollectionsAction,
    },
    /// Inspect or export the rows of a collection
    Rows {
        #[command(subcommand)]
        action: RowsAction,
    },
    /// Ingest a saved response body (HTML table or JSON feed)
    Ingest {
        /// File holding the response body
        file: PathBuf,
        /// Input format: table, feed, or auto
        #[arg(long, default_value = "auto")]
        format: cli::ingest_cmd::IngestFormat,
    },
    /// Reconcile the two sources inside a collection
    Reconcile {
        /// Collection id (defaults to the active collection)
        #[arg(long)]
        collection: Option<String>,
    },
    /// Poll a URL and persist every recognized response
    Watch {
        /// URL to poll
        url: String,
        /// Poll interval in seconds
        #[arg(long, default_value = "30")]
        interval: u64,
        /// Content types worth capturing (e.g. json, html, text/*). Repeatable.
        #[arg(long = "content-type", default_values = ["json", "html"])]
        content_types: Vec<ContentTypeToken>,
        /// Maximum captured body length in characters
        #[arg(long, default_value = "100000")]
        max_body_chars: usize,
    },
}

#[derive(Subcommand)]
enum CollectionsAction {
    /// List all collections
    List,
    /// Create a collection
    Create {
        name: String,
        /// Also make it the active collection
        #[arg(long)]
        activate: bool,
    },
    /// Rename a collection
    Rename { id: String, name: String },
    /// Set a collection's note
    Note { id: String, note: String },
    /// Pin a collection
    Pin { id: String },
    /// Unpin a collection
    Unpin { id: String },
    /// Delete a collection and all its rows
    Delete { id: String },
    /// Copy a collection and its rows
    Duplicate {
        id: String,
        /// Name for the copy
        #[arg(long)]
        name: Option<String>,
    },
    /// Set (or clear) the scope's active collection
    Use {
        /// Collection id; omit to clear the pointer
        id: Option<String>,
    },
}

#[derive(Subcommand)]
enum RowsAction {
    /// List rows
    List {
        #[arg(long)]
        collection: Option<String>,
        /// Maximum rows to print
        #[arg(long)]
        limit: Option<u32>,
        /// Rows to skip before printing
        #[arg(long, default_value = "0")]
        offset: u32,
    },
    /// Count rows
    Count {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Remove all rows, keeping the collection
    Clear {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Export rows as CSV
    Export {
        #[arg(long)]
        collection: Option<String>,
        /// Output file; omit to print to stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json {
        std::env::set_var("CHEQUEFLOW_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("CHEQUEFLOW_QUIET", "1");
    }

    let default_directive = if cli.verbose {
        "chequeflow=debug"
    } else {
        "chequeflow=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_writer(std::io::stderr)
        .init();

    let repo = Arc::new(match &cli.db {
        Some(path) => ChequeRepo::open(path)?,
        None => ChequeRepo::open_default()?,
    });

    let result = match cli.command {
        Commands::Collections { action } => match action {
            CollectionsAction::List => cli::collections_cmd::run_list(&repo).await,
            CollectionsAction::Create { name, activate } => {
                cli::collections_cmd::run_create(&repo, &name, activate).await
            }
            CollectionsAction::Rename { id, name } => {
                cli::collections_cmd::run_rename(&repo, &id, &name).await
            }
            CollectionsAction::Note { id, note } => {
                cli::collections_cmd::run_note(&repo, &id, &note).await
            }
            CollectionsAction::Pin { id } => cli::collections_cmd::run_pin(&repo, &id, true).await,
            CollectionsAction::Unpin { id } => {
                cli::collections_cmd::run_pin(&repo, &id, false).await
            }
            CollectionsAction::Delete { id } => cli::collections_cmd::run_delete(&repo, &id).await,
            CollectionsAction::Duplicate { id, name } => {
                cli::collections_cmd::run_duplicate(&repo, &id, name.as_deref()).await
            }
            CollectionsAction::Use { id } => {
                cli::collections_cmd::run_use(&repo, id.as_deref()).await
            }
        },
        Commands::Rows { action } => match action {
            RowsAction::List {
                collection,
                limit,
                offset,
            } => cli::rows_cmd::run_list(&repo, collection.as_deref(), limit, offset).await,
            RowsAction::Count { collection } => {
                cli::rows_cmd::run_count(&repo, collection.as_deref()).await
            }
            RowsAction::Clear { collection } => {
                cli::rows_cmd::run_clear(&repo, collection.as_deref()).await
            }
            RowsAction::Export { collection, out } => {
                cli::rows_cmd::run_export(&repo, collection.as_deref(), out.as_deref()).await
            }
        },
        Commands::Ingest { file, format } => {
            cli::ingest_cmd::run(Arc::clone(&repo), &file, format).await
        }
        Commands::Reconcile { collection } => {
            cli::reconcile_cmd::run(&repo, collection.as_deref()).await
        }
        Commands::Watch {
            url,
            interval,
            content_types,
            max_body_chars,
        } => {
            cli::watch_cmd::run(
                Arc::clone(&repo),
                &url,
                interval,
                content_types,
                max_body_chars,
            )
            .await
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli::output::is_quiet() && !cli::output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        }
        std::process::exit(1);
    }

    result
}
