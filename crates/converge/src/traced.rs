//! Traced database connection wrapper.
//!
//! Wraps a tokio-postgres connection and logs all queries via tracing. This is
//! also where the reconciler's [`Database`] seam meets real Postgres.

use crate::DbError;
use crate::database::{Database, DbFuture};
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::Instrument;

const COLUMNS_SQL: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1::text \
     ORDER BY ordinal_position";

const TRIGGER_SQL: &str = "SELECT 1 FROM pg_trigger t \
     JOIN pg_class c ON c.oid = t.tgrelid \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE t.tgname = $1 AND c.relname = $2 AND n.nspname = current_schema() \
     AND NOT t.tgisinternal LIMIT 1";

/// A wrapper around a database connection that logs all queries via tracing.
///
/// # Example
///
/// ```ignore
/// use converge::ConnectionExt;
///
/// let conn = pool.get().await?;
/// let db = conn.traced();
/// converge::reconcile_all(&db, &tables, &options).await?;
/// ```
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    /// Create a new traced connection wrapper.
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Execute a statement, returning the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, Error> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = tracing::field::Empty,
        );
        let affected = self
            .conn
            .execute(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("affected", affected);
        Ok(affected)
    }

    /// Execute a query, returning all rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self
            .conn
            .query(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Execute a query, returning at most one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let row = self
            .conn
            .query_opt(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", if row.is_some() { 1u64 } else { 0u64 });
        Ok(row)
    }
}

impl<C: Connection> Database for TracedConn<'_, C> {
    fn execute_ddl<'a>(&'a self, sql: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.execute(sql, &[]).await?;
            Ok::<_, DbError>(())
        })
    }

    fn column_names<'a>(&'a self, table: &'a str) -> DbFuture<'a, Vec<String>> {
        Box::pin(async move {
            let rows = self.query(COLUMNS_SQL, &[&table]).await?;
            let mut names = Vec::with_capacity(rows.len());
            for row in rows {
                names.push(row.try_get::<_, String>(0)?);
            }
            Ok::<_, DbError>(names)
        })
    }

    fn trigger_exists<'a>(&'a self, table: &'a str, trigger: &'a str) -> DbFuture<'a, bool> {
        Box::pin(async move {
            let row = self.query_opt(TRIGGER_SQL, &[&trigger, &table]).await?;
            Ok::<_, DbError>(row.is_some())
        })
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection + Sized {
    /// Wrap this connection in a `TracedConn` for query logging.
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection> ConnectionExt for C {}

type PgFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// Trait for database connections that can execute queries.
///
/// This is implemented for `tokio_postgres::Client` and `deadpool_postgres::Object`.
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, u64>;

    /// Execute a query, returning all rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Vec<Row>>;

    /// Execute a query, returning at most one row.
    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Option<Row>>;
}

impl Connection for tokio_postgres::Client {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, u64> {
        Box::pin(tokio_postgres::Client::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Option<Row>> {
        Box::pin(tokio_postgres::Client::query_opt(self, sql, params))
    }
}

impl Connection for deadpool_postgres::Object {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, u64> {
        // Deref to the underlying Client to avoid recursion
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.execute(sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Vec<Row>> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.query(sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> PgFuture<'a, Option<Row>> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.query_opt(sql, params))
    }
}
