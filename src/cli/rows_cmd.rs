//! CLI handlers for row-level commands on a collection.

use crate::cli::output;
use crate::store::ChequeRepo;
use anyhow::{Context, Result};
use std::path::Path;

/// Resolve an explicit collection id or fall back to the scope's active one.
pub fn resolve_collection(repo: &ChequeRepo, id: Option<&str>) -> Result<String> {
    match id {
        Some(id) => Ok(id.to_string()),
        None => Ok(repo.require_active()?.id),
    }
}

pub async fn run_list(
    repo: &ChequeRepo,
    id: Option<&str>,
    limit: Option<u32>,
    offset: u32,
) -> Result<()> {
    let id = resolve_collection(repo, id)?;
    let rows = repo.list_rows(&id, limit, offset)?;

    if output::is_json() {
        output::print_json(&rows);
        return Ok(());
    }

    if rows.is_empty() {
        println!("  No rows in collection {id}.");
        return Ok(());
    }
    println!("  {} rows:\n", rows.len());
    for row in &rows {
        let c = &row.cheque;
        println!(
            "    {:>10}  {}  {:<18} {:>14}  {}  [{}]",
            c.id, c.date, c.payment_type, c.amount, c.device_name, row.source
        );
    }
    Ok(())
}

pub async fn run_count(repo: &ChequeRepo, id: Option<&str>) -> Result<()> {
    let id = resolve_collection(repo, id)?;
    let count = repo.count_rows(&id)?;

    if output::is_json() {
        output::print_json(&serde_json::json!({ "collection": id, "count": count }));
    } else {
        println!("  {count} rows in collection {id}");
    }
    Ok(())
}

pub async fn run_clear(repo: &ChequeRepo, id: Option<&str>) -> Result<()> {
    let id = resolve_collection(repo, id)?;
    let removed = repo.clear_rows(&id)?;
    if !output::is_quiet() && !output::is_json() {
        println!("  Removed {removed} rows from collection {id}");
    }
    Ok(())
}

pub async fn run_export(repo: &ChequeRepo, id: Option<&str>, out: Option<&Path>) -> Result<()> {
    let id = resolve_collection(repo, id)?;
    let csv = repo.export_csv(&id)?;

    match out {
        Some(path) => {
            std::fs::write(path, &csv)
                .with_context(|| format!("failed to write {}", path.display()))?;
            if !output::is_quiet() && !output::is_json() {
                println!("  Exported collection {id} to {}", path.display());
            }
        }
        None => print!("{csv}"),
    }
    Ok(())
}
