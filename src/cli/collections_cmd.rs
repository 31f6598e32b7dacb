//! CLI handlers for collection lifecycle commands.

use crate::cli::output;
use crate::store::{ChequeRepo, Collection};
use anyhow::Result;
use chrono::{TimeZone, Utc};

fn print_collection(c: &Collection, active: bool) {
    let marker = if active { "*" } else { " " };
    let pin = if c.pinned { "[pinned]" } else { "        " };
    println!(
        "  {marker} {pin} {}  {}  ({})",
        c.id,
        c.name,
        format_ms(c.updated_at)
    );
    if !c.note.is_empty() {
        println!("        note: {}", c.note);
    }
}

fn format_ms(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ms.to_string(),
    }
}

pub async fn run_list(repo: &ChequeRepo) -> Result<()> {
    let collections = repo.list()?;
    let active_id = repo.get_active_id()?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "scope": repo.scope(),
            "active": active_id,
            "collections": collections,
        }));
        return Ok(());
    }

    if collections.is_empty() {
        println!("  No collections yet. Create one with 'chequeflow collections create <name>'.");
        return Ok(());
    }
    println!("  Collections (scope: {}):\n", repo.scope());
    for c in &collections {
        print_collection(c, active_id.as_deref() == Some(&c.id));
    }
    Ok(())
}

pub async fn run_create(repo: &ChequeRepo, name: &str, activate: bool) -> Result<()> {
    let collection = repo.create(name)?;
    if activate {
        repo.set_active_id(Some(&collection.id))?;
    }

    if output::is_json() {
        output::print_json(&collection);
    } else {
        println!("  Created collection {} ({})", collection.name, collection.id);
    }
    Ok(())
}

pub async fn run_rename(repo: &ChequeRepo, id: &str, name: &str) -> Result<()> {
    repo.rename(id, name)?;
    if !output::is_quiet() && !output::is_json() {
        println!("  Renamed {id} to {name}");
    }
    Ok(())
}

pub async fn run_note(repo: &ChequeRepo, id: &str, note: &str) -> Result<()> {
    repo.update_note(id, note)?;
    if !output::is_quiet() && !output::is_json() {
        println!("  Updated note on {id}");
    }
    Ok(())
}

pub async fn run_pin(repo: &ChequeRepo, id: &str, pinned: bool) -> Result<()> {
    repo.set_pinned(id, pinned)?;
    if !output::is_quiet() && !output::is_json() {
        println!("  {} {id}", if pinned { "Pinned" } else { "Unpinned" });
    }
    Ok(())
}

pub async fn run_delete(repo: &ChequeRepo, id: &str) -> Result<()> {
    repo.delete(id)?;
    if !output::is_quiet() && !output::is_json() {
        println!("  Deleted collection {id}");
    }
    Ok(())
}

pub async fn run_duplicate(repo: &ChequeRepo, id: &str, name: Option<&str>) -> Result<()> {
    let copy = repo.duplicate(id, name)?;
    if output::is_json() {
        output::print_json(&copy);
    } else {
        println!("  Duplicated into {} ({})", copy.name, copy.id);
    }
    Ok(())
}

pub async fn run_use(repo: &ChequeRepo, id: Option<&str>) -> Result<()> {
    repo.set_active_id(id)?;
    if !output::is_quiet() && !output::is_json() {
        match id {
            Some(id) => println!("  Active collection is now {id} (scope: {})", repo.scope()),
            None => println!("  Cleared active collection (scope: {})", repo.scope()),
        }
    }
    Ok(())
}
