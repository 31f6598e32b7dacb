//! Schema-validated mapping of the JSON checks feed into cheque records.
//!
//! The feed is validated structurally — every field of every item, including
//! nested objects — before any mapping runs. A payload that fails validation
//! is reported as not recognized; there is no partial mapping. Mapping itself
//! goes through a table of default transform functions, each individually
//! overridable by the caller.

use crate::cheque::{Cheque, PAYMENT_CARD, PAYMENT_CASH, PAYMENT_MIXED, SOURCE_COSTVISER};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

// ── Feed schema ─────────────────────────────────────────────────────────────

/// Top-level checks feed payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ChecksFeed {
    pub items: Vec<CheckItem>,
}

/// One check item as delivered by the feed.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckItem {
    pub actions: Actions,
    pub id: i64,
    pub code: String,
    pub check_type: String,
    pub created_at: String,
    pub num: i64,
    pub quantity: f64,
    pub discount: f64,
    pub total: f64,
    pub error: Option<String>,
    pub comment: Option<String>,
    pub shift: i64,
    pub fields: CheckFields,
    pub change: f64,
    pub total_payments: f64,
    pub payment_source: String,
    pub employee_ids: Vec<i64>,
    pub turn_id: i64,
    pub cashbox_id: i64,
    pub cashier_id: i64,
    pub device_id: i64,
    pub department_id: i64,
    pub card_id: Option<i64>,
    pub check_id: Option<i64>,
    pub card: Option<Value>,
    pub cashier: Cashier,
    pub vat_amount: f64,
}

/// Per-item permission flags.
#[derive(Debug, Clone, Deserialize)]
pub struct Actions {
    pub read: bool,
    pub edit: bool,
    pub destroy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cashier {
    pub id: i64,
    pub name: String,
}

/// Nested field container — the feed wraps fiscal data under `fields.KKT`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckFields {
    #[serde(rename = "KKT")]
    pub kkt: Kkt,
}

/// Fiscal device block.
#[derive(Debug, Clone, Deserialize)]
pub struct Kkt {
    #[serde(rename = "fn")]
    pub fiscal_storage: String,
    pub inn: String,
    pub num: i64,
    pub sno: String,
    pub date: String,
    pub flag: String,
    pub total: f64,
    pub kkt_rn: String,
    #[serde(rename = "Сумма НДС")]
    pub vat_sum: String,
}

/// Outcome of validating a candidate feed payload.
#[derive(Debug)]
pub enum FeedParse {
    /// The payload matched the full feed schema.
    Recognized(ChecksFeed),
    /// The payload is something else — no mapping was attempted.
    NotRecognized,
}

impl FeedParse {
    pub fn recognized(self) -> Option<ChecksFeed> {
        match self {
            FeedParse::Recognized(feed) => Some(feed),
            FeedParse::NotRecognized => None,
        }
    }
}

/// Validate an already-parsed JSON value against the feed schema.
///
/// A single missing or mistyped field anywhere in the shape — including
/// nested `fields.KKT` members — rejects the whole payload.
pub fn validate_feed(value: &Value) -> FeedParse {
    match serde_json::from_value::<ChecksFeed>(value.clone()) {
        Ok(feed) => FeedParse::Recognized(feed),
        Err(err) => {
            tracing::debug!("feed not recognized: {err}");
            FeedParse::NotRecognized
        }
    }
}

/// Parse a response body string and validate it as a checks feed.
pub fn parse_feed_str(body: &str) -> FeedParse {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => validate_feed(&value),
        Err(_) => FeedParse::NotRecognized,
    }
}

// ── Default transforms ──────────────────────────────────────────────────────

fn iso_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2})").unwrap())
}

/// Reformat an ISO-with-offset timestamp into the fixed display format.
///
/// `2025-10-27T16:30:00.000+10:00` → `27.10.2025 16:30`. The wall-clock time
/// embedded in the string is kept as-is — no timezone conversion. Input that
/// does not look like an ISO timestamp passes through verbatim.
pub fn format_date_display(iso: &str) -> String {
    match iso_prefix_re().captures(iso) {
        Some(c) => format!("{}.{}.{} {}:{}", &c[3], &c[2], &c[1], &c[4], &c[5]),
        None => iso.to_string(),
    }
}

/// Format a number the Russian-locale way: NBSP thousands groups, comma
/// decimal separator, up to three fractional digits with trailing zeros
/// trimmed.
pub fn format_amount_ru(n: f64) -> String {
    let negative = n < 0.0;
    let scaled = (n.abs() * 1000.0).round() as u64;
    let int_part = scaled / 1000;
    let frac_part = scaled % 1000;

    let digits = int_part.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('\u{00A0}');
        }
        grouped.push(ch);
    }

    let mut out = String::new();
    if negative && (int_part > 0 || frac_part > 0) {
        out.push('-');
    }
    out.push_str(&grouped);
    if frac_part > 0 {
        let mut frac = format!("{frac_part:03}");
        while frac.ends_with('0') {
            frac.pop();
        }
        out.push(',');
        out.push_str(&frac);
    }
    out
}

fn default_sign(check_type: &str) -> String {
    match check_type {
        "sale" => "Приход",
        "sale_return" => "Возврат прихода",
        "buy" => "Расход",
        "return_buy" => "Возврат расхода",
        other => other,
    }
    .to_string()
}

fn default_payment_type(payment_source: &str) -> String {
    match payment_source {
        "electron" => PAYMENT_CARD,
        "cash" => PAYMENT_CASH,
        "combined" => PAYMENT_MIXED,
        "cashback" => PAYMENT_CASH,
        other => other,
    }
    .to_string()
}

fn default_device_name(item: &CheckItem) -> String {
    if item.fields.kkt.kkt_rn.is_empty() {
        item.device_id.to_string()
    } else {
        item.fields.kkt.kkt_rn.clone()
    }
}

// ── Mapper ──────────────────────────────────────────────────────────────────

type ItemFn = Box<dyn Fn(&CheckItem) -> String + Send + Sync>;
type CodeFn = Box<dyn Fn(&str) -> String + Send + Sync>;
type AmountFn = Box<dyn Fn(f64) -> String + Send + Sync>;

/// Field-mapping table from feed items to cheque records.
///
/// Every transform has a default matching the search-table presentation and
/// can be replaced individually via the `with_*` builders.
pub struct ChequeMapper {
    build_row_id: ItemFn,
    build_details_url: ItemFn,
    fns_status: ItemFn,
    crpt_status: ItemFn,
    device_name: ItemFn,
    format_amount: AmountFn,
    format_date: CodeFn,
    map_sign: CodeFn,
    map_payment_type: CodeFn,
    map_sale: ItemFn,
}

impl Default for ChequeMapper {
    fn default() -> Self {
        Self {
            build_row_id: Box::new(|i| format!("terminal_cheque_{}_id", i.num)),
            build_details_url: Box::new(|_| String::new()),
            fns_status: Box::new(|_| String::new()),
            crpt_status: Box::new(|_| String::new()),
            device_name: Box::new(default_device_name),
            format_amount: Box::new(|n| format!("{} ₽", format_amount_ru(n))),
            format_date: Box::new(|iso| format_date_display(iso)),
            map_sign: Box::new(|t| default_sign(t)),
            map_payment_type: Box::new(|s| default_payment_type(s)),
            map_sale: Box::new(|i| i.quantity.to_string()),
        }
    }
}

impl ChequeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_id(mut self, f: impl Fn(&CheckItem) -> String + Send + Sync + 'static) -> Self {
        self.build_row_id = Box::new(f);
        self
    }

    pub fn with_details_url(
        mut self,
        f: impl Fn(&CheckItem) -> String + Send + Sync + 'static,
    ) -> Self {
        self.build_details_url = Box::new(f);
        self
    }

    pub fn with_fns_status(
        mut self,
        f: impl Fn(&CheckItem) -> String + Send + Sync + 'static,
    ) -> Self {
        self.fns_status = Box::new(f);
        self
    }

    pub fn with_crpt_status(
        mut self,
        f: impl Fn(&CheckItem) -> String + Send + Sync + 'static,
    ) -> Self {
        self.crpt_status = Box::new(f);
        self
    }

    pub fn with_device_name(
        mut self,
        f: impl Fn(&CheckItem) -> String + Send + Sync + 'static,
    ) -> Self {
        self.device_name = Box::new(f);
        self
    }

    pub fn with_amount_format(mut self, f: impl Fn(f64) -> String + Send + Sync + 'static) -> Self {
        self.format_amount = Box::new(f);
        self
    }

    pub fn with_date_format(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.format_date = Box::new(f);
        self
    }

    pub fn with_sign(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.map_sign = Box::new(f);
        self
    }

    pub fn with_payment_type(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.map_payment_type = Box::new(f);
        self
    }

    pub fn with_sale(mut self, f: impl Fn(&CheckItem) -> String + Send + Sync + 'static) -> Self {
        self.map_sale = Box::new(f);
        self
    }

    /// Map every feed item into a cheque record.
    pub fn map(&self, feed: &ChecksFeed) -> Vec<Cheque> {
        feed.items
            .iter()
            .map(|item| Cheque {
                id: (self.build_row_id)(item),
                details_url: (self.build_details_url)(item),
                fns_status: (self.fns_status)(item),
                crpt_status: (self.crpt_status)(item),
                sign: (self.map_sign)(&item.check_type),
                payment_type: (self.map_payment_type)(&item.payment_source),
                date: (self.format_date)(&item.fields.kkt.date),
                device_name: (self.device_name)(item),
                sale: (self.map_sale)(item),
                shift: item.shift.to_string(),
                amount: (self.format_amount)(item.total),
                source: SOURCE_COSTVISER.to_string(),
            })
            .collect()
    }
}

/// Map a feed with the default transform table.
pub fn map_feed(feed: &ChecksFeed) -> Vec<Cheque> {
    ChequeMapper::default().map(feed)
}
