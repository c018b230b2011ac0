//! The reconciler's view of a database.

use crate::DbError;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Database`] methods.
pub type DbFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DbError>> + Send + 'a>>;

/// Everything the reconciler needs from a database: DDL execution and two
/// catalog lookups.
///
/// Implemented for [`TracedConn`](crate::TracedConn) (real Postgres) and, with
/// the `testing` feature, for the in-memory `testing::FakeDatabase`.
pub trait Database: Send + Sync {
    /// Execute a single DDL (or transaction control) statement.
    fn execute_ddl<'a>(&'a self, sql: &'a str) -> DbFuture<'a, ()>;

    /// Column names of `table` in catalog order; empty if the table does not exist.
    fn column_names<'a>(&'a self, table: &'a str) -> DbFuture<'a, Vec<String>>;

    /// Whether `table` (in the current schema) has a non-internal trigger
    /// named `trigger`. Trigger names are only unique per table.
    fn trigger_exists<'a>(&'a self, table: &'a str, trigger: &'a str) -> DbFuture<'a, bool>;
}

const SAVEPOINT: &str = "converge_step";

/// Execute a statement whose failure the caller is going to tolerate.
///
/// Inside a transaction a failed statement poisons everything after it, so
/// when `guarded` is set the statement runs under a savepoint that is rolled
/// back on failure.
pub(crate) async fn execute_tolerated(
    db: &dyn Database,
    sql: &str,
    guarded: bool,
) -> Result<(), DbError> {
    if !guarded {
        return db.execute_ddl(sql).await;
    }

    let (begin, rollback, release) = converge_sql::savepoint_sql(SAVEPOINT);
    db.execute_ddl(&begin).await?;
    match db.execute_ddl(sql).await {
        Ok(()) => db.execute_ddl(&release).await,
        Err(e) => {
            if let Err(rollback_err) = db.execute_ddl(&rollback).await {
                tracing::error!(error = %rollback_err, "failed to roll back to savepoint");
            }
            Err(e)
        }
    }
}
