//! Permissive parsing of locale-formatted amount strings.
//!
//! Amounts arrive as presentation strings ("1 234,56 ₽") with Russian-locale
//! grouping. Parsing is intentionally lossy: it takes the first signed decimal
//! number it can find and yields 0.0 for anything else. It never fails.

use regex::Regex;
use std::sync::OnceLock;

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:[.,]\d+)?").unwrap())
}

/// Parse a locale-formatted amount into a number.
///
/// Strips every space variant (ASCII space, NBSP, narrow NBSP, thin space),
/// then extracts the first `-?\d+(?:[.,]\d+)?` match, treating a comma as the
/// decimal separator. Empty or non-numeric input yields `0.0`.
pub fn parse_amount(input: &str) -> f64 {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\n' | '\r' | '\u{00A0}' | '\u{202F}' | '\u{2009}'))
        .collect();

    let Some(m) = number_re().find(&stripped) else {
        return 0.0;
    };

    let n: f64 = m.as_str().replace(',', ".").parse().unwrap_or(0.0);
    if n.is_finite() {
        n
    } else {
        0.0
    }
}
