//! Column reconciliation.
//!
//! Only presence is reconciled. A declared column whose definition changed
//! after it was created (type, default, constraints) is left alone: the
//! definition string is used for `ADD COLUMN` and nothing else.
//!
//! All additions are issued before any removal, so a rename expressed as
//! "declare the new name, stop declaring the old one" never leaves the table
//! with neither column.

use crate::catalog::{LiveColumnSet, SchemaCatalogReader};
use crate::database::{Database, execute_tolerated};
use crate::error::ColumnOp;
use crate::report::{ColumnFailure, ColumnOutcome};
use crate::{Error, Result};
use indexmap::IndexMap;
use tracing::{error, info, warn};

/// What to do when a single `ADD COLUMN` or `DROP COLUMN` fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColumnErrorPolicy {
    /// A failed addition aborts the table; a failed removal is logged and the
    /// remaining removals still run.
    #[default]
    AbortOnAdd,
    /// The first failure in either pass aborts the table.
    Strict,
    /// Failures in either pass are logged, recorded in the report, and the
    /// remaining statements still run.
    Lenient,
}

impl ColumnErrorPolicy {
    fn tolerates(self, op: ColumnOp) -> bool {
        match self {
            ColumnErrorPolicy::AbortOnAdd => op == ColumnOp::Drop,
            ColumnErrorPolicy::Strict => false,
            ColumnErrorPolicy::Lenient => true,
        }
    }
}

/// Columns to add and drop to make a live table match its declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPlan {
    /// `(name, definition)` in declaration order.
    pub additions: Vec<(String, String)>,
    /// Live names (exact catalog spelling) in catalog order.
    pub removals: Vec<String>,
}

impl ColumnPlan {
    /// Compare declared against live names, case-insensitively.
    pub fn compute(declared: &IndexMap<String, String>, live: &LiveColumnSet) -> Self {
        let live_names = live.normalized();
        let declared_names: std::collections::HashSet<String> =
            declared.keys().map(|c| c.to_lowercase()).collect();

        let additions = declared
            .iter()
            .filter(|(name, _)| !live_names.contains(&name.to_lowercase()))
            .map(|(name, definition)| (name.clone(), definition.clone()))
            .collect();

        let removals = live
            .iter()
            .filter(|name| !declared_names.contains(&name.to_lowercase()))
            .map(|name| name.to_string())
            .collect();

        Self {
            additions,
            removals,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

impl std::fmt::Display for ColumnPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, definition) in &self.additions {
            writeln!(f, "+ {}: {}", name, definition)?;
        }
        for name in &self.removals {
            writeln!(f, "- {}", name)?;
        }
        Ok(())
    }
}

pub struct ColumnReconciler<'a> {
    db: &'a dyn Database,
    catalog: SchemaCatalogReader<'a>,
    policy: ColumnErrorPolicy,
    guarded: bool,
}

impl<'a> ColumnReconciler<'a> {
    pub fn new(db: &'a dyn Database, policy: ColumnErrorPolicy) -> Self {
        Self {
            db,
            catalog: SchemaCatalogReader::new(db),
            policy,
            guarded: false,
        }
    }

    /// Run tolerated statements under savepoints (inside a per-table transaction).
    pub fn guarded(mut self, guarded: bool) -> Self {
        self.guarded = guarded;
        self
    }

    /// Add missing declared columns, then drop live columns no longer declared.
    pub async fn reconcile_columns(
        &self,
        table: &str,
        declared: &IndexMap<String, String>,
    ) -> Result<ColumnOutcome> {
        let live = self.catalog.list_columns(table).await?;
        let plan = ColumnPlan::compute(declared, &live);
        let mut outcome = ColumnOutcome::default();

        for (column, definition) in &plan.additions {
            let sql = converge_sql::add_column_sql(table, column, definition);
            if self.apply(table, column, ColumnOp::Add, &sql, &mut outcome).await? {
                info!(table, column = %column, definition = %definition, "column added");
                outcome.added.push(column.clone());
            }
        }

        for column in &plan.removals {
            let sql = converge_sql::drop_column_sql(table, column);
            if self.apply(table, column, ColumnOp::Drop, &sql, &mut outcome).await? {
                info!(table, column = %column, "column dropped");
                outcome.dropped.push(column.clone());
            }
        }

        Ok(outcome)
    }

    /// Returns `Ok(false)` for a failure the policy tolerates.
    async fn apply(
        &self,
        table: &str,
        column: &str,
        op: ColumnOp,
        sql: &str,
        outcome: &mut ColumnOutcome,
    ) -> Result<bool> {
        let tolerated = self.policy.tolerates(op);

        let result = if tolerated {
            execute_tolerated(self.db, sql, self.guarded).await
        } else {
            self.db.execute_ddl(sql).await
        };

        match result {
            Ok(()) => Ok(true),
            Err(source) if tolerated => {
                warn!(table, column, %op, error = %source, "column change failed, continuing");
                outcome.failures.push(ColumnFailure {
                    column: column.to_string(),
                    op,
                    message: source.to_string(),
                });
                Ok(false)
            }
            Err(source) => {
                error!(table, column, %op, error = %source, "column change failed");
                Err(Error::ColumnAlter {
                    table: table.to_string(),
                    column: column.to_string(),
                    op,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDatabase;
    use proptest::prelude::*;

    fn declared(columns: &[(&str, &str)]) -> IndexMap<String, String> {
        columns
            .iter()
            .map(|(n, d)| (n.to_string(), d.to_string()))
            .collect()
    }

    fn live(names: &[&str]) -> LiveColumnSet {
        LiveColumnSet::new(names.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn test_plan_additions_and_removals() {
        let plan = ColumnPlan::compute(
            &declared(&[("id", "SERIAL"), ("email", "TEXT"), ("phone", "TEXT")]),
            &live(&["id", "legacy_field"]),
        );
        assert_eq!(
            plan.additions,
            vec![
                ("email".to_string(), "TEXT".to_string()),
                ("phone".to_string(), "TEXT".to_string()),
            ]
        );
        assert_eq!(plan.removals, vec!["legacy_field".to_string()]);
    }

    #[test]
    fn test_plan_is_case_insensitive() {
        let plan = ColumnPlan::compute(
            &declared(&[("createdAt", "TIMESTAMPTZ"), ("ID", "SERIAL")]),
            &live(&["createdat", "id"]),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_drops_keep_catalog_spelling() {
        let plan = ColumnPlan::compute(&declared(&[("id", "SERIAL")]), &live(&["id", "OldName"]));
        assert_eq!(plan.removals, vec!["OldName".to_string()]);
    }

    #[test]
    fn test_plan_display() {
        let plan = ColumnPlan::compute(
            &declared(&[("id", "SERIAL"), ("email", "TEXT NOT NULL")]),
            &live(&["id", "nickname"]),
        );
        insta::assert_snapshot!(plan.to_string(), @r"
        + email: TEXT NOT NULL
        - nickname
        ");
    }

    fn column_name() -> impl Strategy<Value = String> {
        "[a-dA-D]{1,2}"
    }

    proptest! {
        #[test]
        fn prop_plan_converges(
            declared_names in proptest::collection::vec(column_name(), 0..6),
            live_names in proptest::collection::vec(column_name(), 0..6),
        ) {
            // Catalogs and declarations never repeat a name case-insensitively.
            let mut decl = IndexMap::new();
            for name in &declared_names {
                if !decl.keys().any(|k: &String| k.eq_ignore_ascii_case(name)) {
                    decl.insert(name.clone(), "TEXT".to_string());
                }
            }
            let mut live_unique: Vec<String> = Vec::new();
            for name in &live_names {
                if !live_unique.iter().any(|k| k.eq_ignore_ascii_case(name)) {
                    live_unique.push(name.clone());
                }
            }
            let live_set = LiveColumnSet::new(live_unique.clone());
            let plan = ColumnPlan::compute(&decl, &live_set);

            // Applying the plan yields exactly the declared set.
            let mut after: Vec<String> = live_unique
                .iter()
                .filter(|n| !plan.removals.contains(n))
                .map(|n| n.to_lowercase())
                .collect();
            after.extend(plan.additions.iter().map(|(n, _)| n.to_lowercase()));
            after.sort();
            let mut expected: Vec<String> = decl.keys().map(|k| k.to_lowercase()).collect();
            expected.sort();
            prop_assert_eq!(after, expected);

            // Nothing is both added and removed.
            for (added, _) in &plan.additions {
                prop_assert!(!plan.removals.iter().any(|r| r.eq_ignore_ascii_case(added)));
            }

            // A second plan against the converged state is empty.
            let converged = LiveColumnSet::new(decl.keys().cloned().collect());
            prop_assert!(ColumnPlan::compute(&decl, &converged).is_empty());
        }
    }

    fn users_db() -> FakeDatabase {
        let db = FakeDatabase::new();
        db.seed_table(
            "users",
            &[("id", "SERIAL PRIMARY KEY"), ("name", "TEXT"), ("legacy_field", "TEXT")],
        );
        db
    }

    #[tokio::test]
    async fn test_adds_missing_and_drops_extra() {
        let db = users_db();
        let decl = declared(&[
            ("id", "SERIAL PRIMARY KEY"),
            ("name", "TEXT"),
            ("email", "TEXT NOT NULL DEFAULT ''"),
            ("phone", "TEXT"),
        ]);

        let outcome = ColumnReconciler::new(&db, ColumnErrorPolicy::default())
            .reconcile_columns("users", &decl)
            .await
            .unwrap();

        assert_eq!(outcome.added, vec!["email", "phone"]);
        assert_eq!(outcome.dropped, vec!["legacy_field"]);
        assert_eq!(db.columns("users"), vec!["id", "name", "email", "phone"]);
        assert_eq!(
            db.column_definition("users", "email").as_deref(),
            Some("TEXT NOT NULL DEFAULT ''")
        );
    }

    #[tokio::test]
    async fn test_additions_precede_removals() {
        let db = FakeDatabase::new();
        db.seed_table("t", &[("b", "TEXT")]);
        let decl = declared(&[("a", "TEXT")]);

        ColumnReconciler::new(&db, ColumnErrorPolicy::default())
            .reconcile_columns("t", &decl)
            .await
            .unwrap();

        let statements = db.statements();
        let add = statements
            .iter()
            .position(|s| s.contains("ADD COLUMN \"a\""))
            .unwrap();
        let drop = statements
            .iter()
            .position(|s| s.contains("DROP COLUMN \"b\""))
            .unwrap();
        assert!(add < drop, "add must come before drop: {:?}", statements);
    }

    #[tokio::test]
    async fn test_failed_addition_aborts_by_default() {
        let db = users_db();
        let decl = declared(&[
            ("id", "SERIAL PRIMARY KEY"),
            ("name", "TEXT"),
            ("broken", "TEXT DEFAULT ("),
            ("phone", "TEXT"),
        ]);

        let err = ColumnReconciler::new(&db, ColumnErrorPolicy::AbortOnAdd)
            .reconcile_columns("users", &decl)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ColumnAlter { ref column, op: ColumnOp::Add, .. } if column == "broken"
        ));
        // Nothing after the failing addition ran, removals included.
        assert_eq!(db.columns("users"), vec!["id", "name", "legacy_field"]);
    }

    #[tokio::test]
    async fn test_failed_removal_is_tolerated_by_default() {
        let db = FakeDatabase::new();
        db.seed_table("t", &[("id", "SERIAL"), ("x", "TEXT"), ("y", "TEXT")]);
        db.fail_statements_containing("DROP COLUMN \"x\"");

        let outcome = ColumnReconciler::new(&db, ColumnErrorPolicy::AbortOnAdd)
            .reconcile_columns("t", &declared(&[("id", "SERIAL")]))
            .await
            .unwrap();

        assert_eq!(outcome.dropped, vec!["y"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].column, "x");
        assert_eq!(outcome.failures[0].op, ColumnOp::Drop);
        assert_eq!(db.columns("t"), vec!["id", "x"]);
    }

    #[tokio::test]
    async fn test_strict_policy_aborts_on_removal() {
        let db = FakeDatabase::new();
        db.seed_table("t", &[("id", "SERIAL"), ("x", "TEXT"), ("y", "TEXT")]);
        db.fail_statements_containing("DROP COLUMN \"x\"");

        let err = ColumnReconciler::new(&db, ColumnErrorPolicy::Strict)
            .reconcile_columns("t", &declared(&[("id", "SERIAL")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ColumnAlter { op: ColumnOp::Drop, .. }));
        assert_eq!(db.columns("t"), vec!["id", "x", "y"]);
    }

    #[tokio::test]
    async fn test_lenient_policy_continues_after_failed_addition() {
        let db = FakeDatabase::new();
        db.seed_table("t", &[("id", "SERIAL"), ("old", "TEXT")]);
        let decl = declared(&[("id", "SERIAL"), ("bad", "(("), ("good", "TEXT")]);

        let outcome = ColumnReconciler::new(&db, ColumnErrorPolicy::Lenient)
            .reconcile_columns("t", &decl)
            .await
            .unwrap();

        assert_eq!(outcome.added, vec!["good"]);
        assert_eq!(outcome.dropped, vec!["old"]);
        assert_eq!(outcome.failures[0].column, "bad");
        assert_eq!(outcome.failures[0].op, ColumnOp::Add);
    }

    #[tokio::test]
    async fn test_converged_table_issues_no_statements() {
        let db = users_db();
        let decl = declared(&[
            ("ID", "SERIAL PRIMARY KEY"),
            ("Name", "TEXT"),
            ("legacy_field", "TEXT"),
        ]);

        let outcome = ColumnReconciler::new(&db, ColumnErrorPolicy::default())
            .reconcile_columns("users", &decl)
            .await
            .unwrap();

        assert!(outcome.is_empty());
        assert!(db.statements().is_empty());
    }
}
