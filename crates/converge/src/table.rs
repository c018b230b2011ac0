//! Table provisioning, including the destructive fallback.
//!
//! # Data loss
//!
//! When `CREATE TABLE IF NOT EXISTS` fails, the table is dropped with
//! `CASCADE` and created again. That removes every row in it and every object
//! depending on it (foreign keys from other tables, views, triggers). This is
//! only acceptable because the declared schema, not the live data, is
//! authoritative for databases this runs against.
//!
//! On Postgres an existing table of any shape satisfies `IF NOT EXISTS`, so
//! column type drift never lands here; that is left to column reconciliation.
//! This path is reached by creates that fail outright, such as malformed DDL
//! or a name collision with a composite type. The in-memory fake in
//! `testing` additionally rejects a create whose column types conflict with
//! the live table, which is stricter than Postgres.

use crate::database::{Database, execute_tolerated};
use crate::report::Provisioning;
use crate::spec::TableSpec;
use crate::{DbError, Error, Result};
use tracing::{error, info, warn};

pub struct TableProvisioner<'a> {
    db: &'a dyn Database,
    guarded: bool,
}

impl<'a> TableProvisioner<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Self { db, guarded: false }
    }

    /// Run the initial create under a savepoint (inside a per-table transaction).
    pub fn guarded(mut self, guarded: bool) -> Self {
        self.guarded = guarded;
        self
    }

    /// Make sure the table exists, dropping and recreating it if the
    /// declared create statement fails.
    pub async fn ensure_table(&self, spec: &TableSpec) -> Result<Provisioning> {
        match self.try_create(spec).await {
            Ok(()) => {
                info!(table = %spec.name, "table ensured");
                Ok(Provisioning::Ensured)
            }
            Err(Error::TableCreation { source, .. }) => {
                self.drop_and_recreate(spec, source).await?;
                Ok(Provisioning::Recreated)
            }
            Err(other) => Err(other),
        }
    }

    /// Issue the declared `CREATE TABLE IF NOT EXISTS`.
    pub async fn try_create(&self, spec: &TableSpec) -> Result<()> {
        execute_tolerated(self.db, &spec.create_statement, self.guarded)
            .await
            .map_err(|source| Error::TableCreation {
                table: spec.name.clone(),
                source,
            })
    }

    /// `DROP TABLE ... CASCADE`, then the declared create again.
    ///
    /// Destroys all rows in the table and everything depending on it.
    pub async fn drop_and_recreate(&self, spec: &TableSpec, first_attempt: DbError) -> Result<()> {
        warn!(
            table = %spec.name,
            error = %first_attempt,
            "create failed; DROPPING TABLE (CASCADE) and recreating it, existing rows will be lost"
        );

        let recreation_failed = |source: DbError| {
            error!(table = %spec.name, error = %source, "table recreation failed");
            Error::TableRecreation {
                table: spec.name.clone(),
                first_attempt: first_attempt.to_string(),
                source,
            }
        };

        self.db
            .execute_ddl(&converge_sql::drop_table_cascade_sql(&spec.name))
            .await
            .map_err(&recreation_failed)?;
        warn!(table = %spec.name, "table dropped");

        self.db
            .execute_ddl(&spec.create_statement)
            .await
            .map_err(&recreation_failed)?;
        info!(table = %spec.name, "table recreated");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDatabase;

    fn notes() -> TableSpec {
        TableSpec::new(
            "notes",
            "CREATE TABLE IF NOT EXISTS notes (id SERIAL PRIMARY KEY, body TEXT NOT NULL, user_id INTEGER)",
        )
        .column("id", "SERIAL PRIMARY KEY")
        .column("body", "TEXT NOT NULL")
        .column("user_id", "INTEGER")
    }

    #[tokio::test]
    async fn test_creates_missing_table() {
        let db = FakeDatabase::new();
        let outcome = TableProvisioner::new(&db).ensure_table(&notes()).await.unwrap();

        assert_eq!(outcome, Provisioning::Ensured);
        assert_eq!(db.columns("notes"), vec!["id", "body", "user_id"]);
    }

    #[tokio::test]
    async fn test_existing_compatible_table_is_kept() {
        let db = FakeDatabase::new();
        db.seed_table("notes", &[("id", "SERIAL PRIMARY KEY"), ("extra", "TEXT")]);

        let outcome = TableProvisioner::new(&db).ensure_table(&notes()).await.unwrap();

        assert_eq!(outcome, Provisioning::Ensured);
        assert_eq!(db.columns("notes"), vec!["id", "extra"]);
        assert!(!db.statements().iter().any(|s| s.starts_with("DROP TABLE")));
    }

    #[tokio::test]
    async fn test_incompatible_table_is_dropped_and_recreated() {
        let db = FakeDatabase::new();
        db.seed_table("notes", &[("id", "TEXT"), ("body", "TEXT"), ("junk", "TEXT")]);

        let outcome = TableProvisioner::new(&db).ensure_table(&notes()).await.unwrap();

        assert_eq!(outcome, Provisioning::Recreated);
        assert_eq!(db.columns("notes"), vec!["id", "body", "user_id"]);
        assert!(
            db.statements()
                .contains(&"DROP TABLE IF EXISTS \"notes\" CASCADE;".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_recreation_is_fatal() {
        let db = FakeDatabase::new();
        db.fail_statements_containing("CREATE TABLE IF NOT EXISTS notes");

        let err = TableProvisioner::new(&db)
            .ensure_table(&notes())
            .await
            .unwrap_err();

        match err {
            Error::TableRecreation {
                table,
                first_attempt,
                ..
            } => {
                assert_eq!(table, "notes");
                assert!(first_attempt.contains("injected failure"));
            }
            other => panic!("expected TableRecreation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_drop_is_fatal() {
        let db = FakeDatabase::new();
        db.seed_table("notes", &[("id", "TEXT")]);
        db.fail_statements_containing("DROP TABLE");

        let err = TableProvisioner::new(&db)
            .ensure_table(&notes())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TableRecreation { .. }));
        // The old table is untouched.
        assert_eq!(db.columns("notes"), vec!["id"]);
    }
}
