//! Durable storage — named cheque collections in SQLite.

mod migrations;
mod repo;

pub use migrations::SCHEMA_VERSION;
pub use repo::{
    default_db_path, resolve_scope, ChequeRepo, Collection, RepoError, RepoResult, StoredRow,
    ENV_DB_PATH, ENV_SCOPE,
};
