use std::time::Duration;
use thiserror::Error;

/// Failure of a single database round-trip.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Reported by backends that are not tokio-postgres (e.g. the in-memory fake).
    #[error("{0}")]
    Backend(String),
}

/// Which half of column reconciliation a statement belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOp {
    Add,
    Drop,
}

impl std::fmt::Display for ColumnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnOp::Add => write!(f, "add"),
            ColumnOp::Drop => write!(f, "drop"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Introspection failed; nothing can be diffed without it.
    #[error("failed to read catalog for {object}: {source}")]
    CatalogRead {
        object: String,
        #[source]
        source: DbError,
    },

    /// The initial `CREATE TABLE IF NOT EXISTS` failed. This is what triggers
    /// the drop-and-recreate fallback; it only escapes if the fallback is not
    /// attempted.
    #[error("failed to create table {table}: {source}")]
    TableCreation {
        table: String,
        #[source]
        source: DbError,
    },

    /// The drop-and-recreate fallback failed.
    #[error(
        "failed to recreate table {table} after dropping it: {source} (initial create failed: {first_attempt})"
    )]
    TableRecreation {
        table: String,
        first_attempt: String,
        #[source]
        source: DbError,
    },

    #[error("failed to {op} column {table}.{column}: {source}")]
    ColumnAlter {
        table: String,
        column: String,
        op: ColumnOp,
        #[source]
        source: DbError,
    },

    #[error("failed to install updated_at trigger on {table}: {source}")]
    TriggerCreation {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("invalid table declaration: {0}")]
    InvalidSpec(String),

    #[error("transaction control failed for table {table}: {source}")]
    Transaction {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("reconciliation did not finish within {0:?}")]
    Timeout(Duration),

    /// Every table that failed when the pass was told to keep going.
    #[error("{}", describe_failures(.0))]
    Aggregate(Vec<TableFailure>),
}

impl Error {
    /// The table this error is about, if it is about exactly one.
    pub fn table(&self) -> Option<&str> {
        match self {
            Error::TableCreation { table, .. }
            | Error::TableRecreation { table, .. }
            | Error::ColumnAlter { table, .. }
            | Error::TriggerCreation { table, .. }
            | Error::Transaction { table, .. } => Some(table),
            _ => None,
        }
    }
}

/// A table whose reconciliation failed, with the error that stopped it.
#[derive(Debug)]
pub struct TableFailure {
    pub table: String,
    pub error: Error,
}

fn describe_failures(failures: &[TableFailure]) -> String {
    let details: Vec<String> = failures
        .iter()
        .map(|f| format!("{}: {}", f.table, f.error))
        .collect();
    format!(
        "{} table(s) failed to reconcile: {}",
        failures.len(),
        details.join("; ")
    )
}
