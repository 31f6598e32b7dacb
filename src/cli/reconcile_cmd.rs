//! CLI handler for reconciling the two sources inside one collection.

use crate::cheque::{date_sort_key, Cheque, SOURCE_COSTVISER, SOURCE_PLATFORMA_OFD};
use crate::cli::output;
use crate::cli::rows_cmd::resolve_collection;
use crate::reconcile::{reconcile, SourceSummary};
use crate::store::ChequeRepo;
use anyhow::Result;

fn print_summary(label: &str, s: &SourceSummary) {
    println!(
        "    {label:<14} {:>4} records   card {:>12.2}   cash {:>12.2}   total {:>12.2}",
        s.count, s.card_total, s.cash_total, s.total
    );
}

fn print_unmatched(label: &str, records: &[Cheque]) {
    if records.is_empty() {
        return;
    }
    let mut records: Vec<&Cheque> = records.iter().collect();
    records.sort_by_key(|c| date_sort_key(&c.date));
    println!("\n  Only in {label}:");
    for c in records {
        println!(
            "    {}  {:<18} {:>14}  shift {}",
            c.date, c.payment_type, c.amount, c.shift
        );
    }
}

pub async fn run(repo: &ChequeRepo, id: Option<&str>) -> Result<()> {
    let id = resolve_collection(repo, id)?;
    let rows = repo.list_rows(&id, None, 0)?;

    let (left, right): (Vec<Cheque>, Vec<Cheque>) = rows
        .into_iter()
        .map(|row| row.cheque)
        .partition(|c| c.source != SOURCE_COSTVISER);

    let result = reconcile(&left, &right);

    if output::is_json() {
        output::print_json(&result);
        return Ok(());
    }

    println!("  Reconciliation for collection {id}:\n");
    print_summary(SOURCE_PLATFORMA_OFD, &result.left);
    print_summary(SOURCE_COSTVISER, &result.right);

    if result.is_balanced() {
        println!("\n  Balanced: every record has a counterpart.");
    } else {
        print_unmatched(SOURCE_PLATFORMA_OFD, &result.unmatched_left);
        print_unmatched(SOURCE_COSTVISER, &result.unmatched_right);
    }
    Ok(())
}
