//! Parse the cheque search table from raw HTML without DOM rendering.
//!
//! Uses the `scraper` crate for CSS selector-based parsing, the same way the
//! structured-data engine reads product markup: a primary selector first, a
//! looser fallback when the page structure drifts, and normalized text for
//! every cell.

use crate::cheque::{Cheque, SOURCE_PLATFORMA_OFD};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

/// Minimum number of columns a cheque row must carry.
const MIN_COLUMNS: usize = 9;

fn row_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"terminal_cheque_(\d+)_id").unwrap())
}

/// Parse cheque rows out of an HTML fragment.
///
/// Candidate rows come from `table.table-cheques_search tbody tr[href]`,
/// falling back to any `tbody tr[href]` when the primary selector matches
/// nothing. Rows with fewer than 9 cells are skipped; rows whose structural
/// ID attribute does not match the expected pattern are still emitted, with
/// an empty identifier. Malformed input yields an empty list — this function
/// never fails.
pub fn parse_cheques(html: &str) -> Vec<Cheque> {
    let document = Html::parse_document(html);
    parse_cheques_document(&document)
}

/// Parse cheque rows out of an already-parsed document.
pub fn parse_cheques_document(document: &Html) -> Vec<Cheque> {
    let primary = Selector::parse("table.table-cheques_search tbody tr[href]").unwrap();
    let fallback = Selector::parse("tbody tr[href]").unwrap();
    let cell_sel = Selector::parse("td").unwrap();

    let rows: Vec<ElementRef<'_>> = {
        let preferred: Vec<ElementRef<'_>> = document.select(&primary).collect();
        if preferred.is_empty() {
            document.select(&fallback).collect()
        } else {
            preferred
        }
    };

    let mut cheques = Vec::new();

    for tr in rows {
        let tds: Vec<ElementRef<'_>> = tr.select(&cell_sel).collect();
        if tds.len() < MIN_COLUMNS {
            continue;
        }

        let row_id = tr.value().attr("id").unwrap_or("");
        let id = row_id_re()
            .captures(row_id)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let details_url = tr.value().attr("href").unwrap_or("").to_string();

        let device_name = {
            let trimmed = select_text(&tds[4], ".js__trim_long_text");
            if trimmed.is_empty() {
                text_of(&tds[4])
            } else {
                trimmed
            }
        };

        cheques.push(Cheque {
            id,
            details_url,
            fns_status: icon_title(&tds[0]),
            payment_type: icon_title(&tds[1]),
            sign: text_of(&tds[2]),
            date: text_of(&tds[3]),
            device_name,
            sale: text_of(&tds[5]),
            shift: text_of(&tds[6]),
            amount: text_of(&tds[7]),
            crpt_status: icon_title(&tds[8]),
            source: SOURCE_PLATFORMA_OFD.to_string(),
        });
    }

    cheques
}

/// Title attribute of the first `i[title]` icon in a cell, trimmed.
fn icon_title(cell: &ElementRef<'_>) -> String {
    let sel = Selector::parse("i[title]").unwrap();
    cell.select(&sel)
        .next()
        .and_then(|i| i.value().attr("title"))
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

/// Text of the first element matching `selector` inside a cell, trimmed.
fn select_text(cell: &ElementRef<'_>, selector: &str) -> String {
    let Ok(sel) = Selector::parse(selector) else {
        return String::new();
    };
    cell.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Normalized text content: NBSP folded to space, whitespace collapsed, trimmed.
fn text_of(cell: &ElementRef<'_>) -> String {
    let raw: String = cell.text().collect();
    raw.replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
