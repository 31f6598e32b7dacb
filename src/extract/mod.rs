//! Extractors — stateless transforms from raw response bodies into canonical
//! cheque records.
//!
//! Two purpose-built parsers, one per source format: a DOM-table parser for
//! the HTML search page and a schema-validating mapper for the JSON checks
//! feed. Both are total functions — malformed input yields an empty result or
//! a "not recognized" outcome, never an error.

pub mod feed;
pub mod table;
