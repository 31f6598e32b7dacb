//! Canonical cheque record — the shape every extractor converges on.
//!
//! All fields are presentation strings taken verbatim from the source;
//! numeric interpretation of `amount` is deferred to consumers (see
//! [`crate::reconcile::amount`]). The `date` field uses the fixed display
//! format `DD.MM.YYYY HH:MM`.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Provenance label for cheques extracted from the HTML search table.
pub const SOURCE_PLATFORMA_OFD: &str = "PlatformaOFD";
/// Provenance label for cheques mapped from the JSON checks feed.
pub const SOURCE_COSTVISER: &str = "Costviser";

/// Display label for card payments.
pub const PAYMENT_CARD: &str = "Оплата картой";
/// Display label for cash payments.
pub const PAYMENT_CASH: &str = "Наличными";
/// Display label for mixed payments.
pub const PAYMENT_MIXED: &str = "Смешанный";

/// One business transaction ("cheque"), normalized from either source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cheque {
    /// Natural identifier. Empty when the structural ID pattern did not match.
    pub id: String,
    /// Details link (URL or opaque string), possibly empty.
    pub details_url: String,
    /// FNS status channel (icon title, e.g. "Принят").
    pub fns_status: String,
    /// CRPT status channel (icon title).
    pub crpt_status: String,
    /// Classification tag, e.g. "Приход" / "Возврат прихода".
    pub sign: String,
    /// Payment-method tag, e.g. "Оплата картой" / "Наличными".
    pub payment_type: String,
    /// Point in time in `DD.MM.YYYY HH:MM` display format.
    pub date: String,
    /// Device/terminal label.
    pub device_name: String,
    /// Sale-sequence label.
    pub sale: String,
    /// Shift label.
    pub shift: String,
    /// Locale-formatted monetary amount, e.g. "1 234,56 ₽".
    pub amount: String,
    /// Which extractor/source produced this record.
    #[serde(default)]
    pub source: String,
}

impl Cheque {
    /// The business identifier used for batch-level dedup, or `None` when
    /// the record carries no usable identifier.
    pub fn natural_key(&self) -> Option<&str> {
        if self.id.is_empty() {
            None
        } else {
            Some(&self.id)
        }
    }
}

/// Sort key for display dates: `DD.MM.YYYY[ HH:MM[:SS]]` → unix millis.
///
/// Unparsable input sorts last (`i64::MAX`), matching how the viewer pushes
/// malformed rows to the end of a listing.
pub fn date_sort_key(date: &str) -> i64 {
    let s = date.trim();
    for fmt in ["%d.%m.%Y %H:%M:%S", "%d.%m.%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return dt.and_utc().timestamp_millis();
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%d.%m.%Y") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return dt.and_utc().timestamp_millis();
        }
    }
    i64::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_round_trip_preserves_every_field() {
        let cheque = Cheque {
            id: "62920551".to_string(),
            details_url: "/web/auth/cheques/62920551".to_string(),
            fns_status: "Принят".to_string(),
            crpt_status: "Принят".to_string(),
            sign: "Приход".to_string(),
            payment_type: PAYMENT_CARD.to_string(),
            date: "23.10.2025 15:50".to_string(),
            device_name: "Табачный Дом Льва Толстого 19".to_string(),
            sale: "56".to_string(),
            shift: "206".to_string(),
            amount: "258 ₽".to_string(),
            source: SOURCE_PLATFORMA_OFD.to_string(),
        };
        let json = serde_json::to_string(&cheque).unwrap();
        assert!(json.contains("detailsUrl"), "field names stay camelCase");
        let back: Cheque = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cheque);
    }

    #[test]
    fn test_natural_key_empty_id() {
        let cheque = Cheque::default();
        assert!(cheque.natural_key().is_none());

        let keyed = Cheque {
            id: "42".to_string(),
            ..Default::default()
        };
        assert_eq!(keyed.natural_key(), Some("42"));
    }

    #[test]
    fn test_date_sort_key_ordering() {
        let a = date_sort_key("23.10.2025 15:50");
        let b = date_sort_key("23.10.2025 15:51");
        let c = date_sort_key("24.10.2025");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_date_sort_key_unparsable_sorts_last() {
        assert_eq!(date_sort_key("not a date"), i64::MAX);
        assert_eq!(date_sort_key(""), i64::MAX);
        assert!(date_sort_key("01.01.2020") < i64::MAX);
    }
}
