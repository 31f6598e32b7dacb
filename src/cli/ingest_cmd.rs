//! CLI handler for one-shot ingestion from a saved response body.

use crate::cheque::{SOURCE_COSTVISER, SOURCE_PLATFORMA_OFD};
use crate::cli::output;
use crate::extract::{feed, table};
use crate::relay::{ChannelMessage, Persister, SaveMeta};
use crate::store::ChequeRepo;
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Which extractor to run over the input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestFormat {
    /// HTML search table.
    Table,
    /// JSON checks feed.
    Feed,
    /// Try the feed first, then the table.
    Auto,
}

impl std::str::FromStr for IngestFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(IngestFormat::Table),
            "feed" => Ok(IngestFormat::Feed),
            "auto" => Ok(IngestFormat::Auto),
            other => bail!("unknown ingest format: {other} (expected table, feed, or auto)"),
        }
    }
}

pub async fn run(repo: Arc<ChequeRepo>, path: &Path, format: IngestFormat) -> Result<()> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let (rows, source) = match format {
        IngestFormat::Table => (table::parse_cheques(&body), SOURCE_PLATFORMA_OFD),
        IngestFormat::Feed => match feed::parse_feed_str(&body).recognized() {
            Some(parsed) => (feed::map_feed(&parsed), SOURCE_COSTVISER),
            None => bail!("input is not a recognized checks feed"),
        },
        IngestFormat::Auto => match feed::parse_feed_str(&body).recognized() {
            Some(parsed) => (feed::map_feed(&parsed), SOURCE_COSTVISER),
            None => (table::parse_cheques(&body), SOURCE_PLATFORMA_OFD),
        },
    };

    if rows.is_empty() {
        bail!("no cheque records found in {}", path.display());
    }

    let persister = Persister::new(Arc::clone(&repo));
    let written = persister.handle(&ChannelMessage::SaveCheques {
        rows,
        meta: SaveMeta {
            source: source.to_string(),
        },
    })?;

    if output::is_json() {
        output::print_json(&serde_json::json!({ "written": written, "source": source }));
    } else if !output::is_quiet() {
        println!("  Ingested {written} rows from {} ({source})", path.display());
    }
    Ok(())
}
