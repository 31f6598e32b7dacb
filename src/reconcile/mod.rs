//! Reconciliation of two independently collected cheque sets.
//!
//! Two sources observe the same underlying transactions but disagree on
//! identifiers, details links, and sale-sequence labels. The reconciler
//! matches records under a tolerant equality rule and reports the symmetric
//! set of unmatched records plus per-source aggregates.

pub mod amount;

use crate::cheque::{Cheque, PAYMENT_CARD, PAYMENT_CASH};
use amount::parse_amount;
use serde::{Deserialize, Serialize};

/// Aggregate totals for one source's records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Sum of amounts where the payment method is "Оплата картой".
    pub card_total: f64,
    /// Sum of amounts where the payment method is "Наличными".
    pub cash_total: f64,
    /// Sum of all amounts.
    pub total: f64,
    /// Number of records.
    pub count: usize,
}

/// Result of reconciling two provenance-partitioned record sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Left-side records with no counterpart on the right.
    pub unmatched_left: Vec<Cheque>,
    /// Right-side records with no counterpart on the left.
    pub unmatched_right: Vec<Cheque>,
    /// Aggregates over the full left input.
    pub left: SourceSummary,
    /// Aggregates over the full right input.
    pub right: SourceSummary,
}

impl Reconciliation {
    /// True when every record on both sides found a counterpart.
    pub fn is_balanced(&self) -> bool {
        self.unmatched_left.is_empty() && self.unmatched_right.is_empty()
    }
}

/// Whether two records describe the same underlying transaction.
///
/// Provenance must differ, then date, parsed amount, shift, sign, and payment
/// method must all agree. The sale-sequence label is deliberately excluded —
/// sources disagree on it without invalidating a match.
pub fn records_match(a: &Cheque, b: &Cheque) -> bool {
    a.source != b.source
        && a.date == b.date
        && parse_amount(&a.amount) == parse_amount(&b.amount)
        && a.shift == b.shift
        && a.sign == b.sign
        && a.payment_type == b.payment_type
}

/// Aggregate a record set into totals by payment method.
pub fn summarize(records: &[Cheque]) -> SourceSummary {
    let mut summary = SourceSummary::default();
    for cheque in records {
        let n = parse_amount(&cheque.amount);
        if cheque.payment_type == PAYMENT_CARD {
            summary.card_total += n;
        } else if cheque.payment_type == PAYMENT_CASH {
            summary.cash_total += n;
        }
        summary.total += n;
        summary.count += 1;
    }
    summary
}

/// Greedy one-pass matching between two provenance-partitioned sets.
///
/// For each left record, the first matching record still unclaimed on the
/// right is consumed. Records left over on either side form the diff.
pub fn reconcile(left: &[Cheque], right: &[Cheque]) -> Reconciliation {
    let mut remaining: Vec<Cheque> = right.to_vec();
    let mut unmatched_left = Vec::new();

    for l in left {
        match remaining.iter().position(|r| records_match(l, r)) {
            Some(pos) => {
                remaining.remove(pos);
            }
            None => unmatched_left.push(l.clone()),
        }
    }

    Reconciliation {
        left: summarize(left),
        right: summarize(right),
        unmatched_left,
        unmatched_right: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cheque::{SOURCE_COSTVISER, SOURCE_PLATFORMA_OFD};

    fn cheque(source: &str, date: &str, amount: &str, shift: &str) -> Cheque {
        Cheque {
            date: date.to_string(),
            amount: amount.to_string(),
            shift: shift.to_string(),
            sign: "Приход".to_string(),
            payment_type: PAYMENT_CASH.to_string(),
            source: source.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_match_requires_differing_provenance() {
        let a = cheque(SOURCE_PLATFORMA_OFD, "01.11.2025 10:00", "100 ₽", "1");
        let mut b = cheque(SOURCE_COSTVISER, "01.11.2025 10:00", "100 ₽", "1");
        assert!(records_match(&a, &b));

        b.source = SOURCE_PLATFORMA_OFD.to_string();
        assert!(!records_match(&a, &b));
    }

    #[test]
    fn test_match_tolerates_amount_formatting() {
        let a = cheque(SOURCE_PLATFORMA_OFD, "01.11.2025 10:00", "1 234,56 ₽", "1");
        let b = cheque(SOURCE_COSTVISER, "01.11.2025 10:00", "1\u{00A0}234,56 ₽", "1");
        assert!(records_match(&a, &b));
    }

    #[test]
    fn test_match_ignores_sale_label() {
        let mut a = cheque(SOURCE_PLATFORMA_OFD, "01.11.2025 10:00", "50 ₽", "2");
        let mut b = cheque(SOURCE_COSTVISER, "01.11.2025 10:00", "50 ₽", "2");
        a.sale = "56".to_string();
        b.sale = "57".to_string();
        assert!(records_match(&a, &b));
    }

    #[test]
    fn test_left_only_record_appears_in_diff() {
        let left = vec![cheque(SOURCE_PLATFORMA_OFD, "A", "100", "1")];
        let right: Vec<Cheque> = vec![];

        let rec = reconcile(&left, &right);
        assert_eq!(rec.unmatched_left, left);
        assert!(rec.unmatched_right.is_empty());
        assert_eq!(rec.right, SourceSummary::default());
        assert_eq!(rec.left.cash_total, 100.0);
        assert_eq!(rec.left.count, 1);
    }

    #[test]
    fn test_matched_pair_consumed_once() {
        let left = vec![
            cheque(SOURCE_PLATFORMA_OFD, "01.11.2025 10:00", "100 ₽", "1"),
            cheque(SOURCE_PLATFORMA_OFD, "01.11.2025 10:00", "100 ₽", "1"),
        ];
        // only one counterpart on the right — the second left record stays unmatched
        let right = vec![cheque(SOURCE_COSTVISER, "01.11.2025 10:00", "100 ₽", "1")];

        let rec = reconcile(&left, &right);
        assert_eq!(rec.unmatched_left.len(), 1);
        assert!(rec.unmatched_right.is_empty());
    }

    #[test]
    fn test_summaries_split_by_payment_method() {
        let mut card = cheque(SOURCE_COSTVISER, "A", "1 000 ₽", "1");
        card.payment_type = PAYMENT_CARD.to_string();
        let cash = cheque(SOURCE_COSTVISER, "A", "258 ₽", "1");
        let mut other = cheque(SOURCE_COSTVISER, "A", "10 ₽", "1");
        other.payment_type = "Смешанный".to_string();

        let summary = summarize(&[card, cash, other]);
        assert_eq!(summary.card_total, 1000.0);
        assert_eq!(summary.cash_total, 258.0);
        assert_eq!(summary.total, 1268.0);
        assert_eq!(summary.count, 3);
    }

    #[test]
    fn test_balanced_reconciliation() {
        let left = vec![cheque(SOURCE_PLATFORMA_OFD, "01.11.2025 10:00", "100 ₽", "1")];
        let right = vec![cheque(SOURCE_COSTVISER, "01.11.2025 10:00", "100,00 ₽", "1")];
        let rec = reconcile(&left, &right);
        assert!(rec.is_balanced());
    }
}
