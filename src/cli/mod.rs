//! CLI subcommand implementations for the chequeflow binary.

pub mod collections_cmd;
pub mod ingest_cmd;
pub mod output;
pub mod reconcile_cmd;
pub mod rows_cmd;
pub mod watch_cmd;
