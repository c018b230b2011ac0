//! Read-only preview of what a pass would do.
//!
//! Uses the same catalog reads as a real pass but executes no DDL. The
//! preview cannot predict a failing `CREATE TABLE` (and therefore the
//! drop-and-recreate fallback); it only reports presence differences.

use crate::catalog::SchemaCatalogReader;
use crate::columns::ColumnPlan;
use crate::database::Database;
use crate::spec::{TableSpec, validate_specs};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub table: String,
    /// The table is absent and would be created from its declaration.
    pub create: bool,
    /// Column changes against the live table (empty when `create` is set).
    pub columns: ColumnPlan,
    pub trigger_missing: bool,
}

impl TablePlan {
    pub fn is_empty(&self) -> bool {
        !self.create && self.columns.is_empty() && !self.trigger_missing
    }
}

/// Plans for every declared table, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    pub tables: Vec<TablePlan>,
}

impl SchemaPlan {
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.is_empty())
    }
}

impl std::fmt::Display for SchemaPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No changes detected.");
        }

        writeln!(f, "Changes detected:\n")?;
        for plan in self.tables.iter().filter(|t| !t.is_empty()) {
            writeln!(f, "  {}:", plan.table)?;
            if plan.create {
                writeln!(f, "    + table {}", plan.table)?;
            }
            for (name, definition) in &plan.columns.additions {
                writeln!(f, "    + {}: {}", name, definition)?;
            }
            for name in &plan.columns.removals {
                writeln!(f, "    - {}", name)?;
            }
            if plan.trigger_missing {
                writeln!(
                    f,
                    "    + trigger {}",
                    converge_sql::touch_trigger_name(&plan.table)
                )?;
            }
        }
        Ok(())
    }
}

/// Compare every declared table with the live catalog without changing anything.
pub async fn plan(db: &dyn Database, specs: &[TableSpec]) -> Result<SchemaPlan> {
    validate_specs(specs)?;
    let catalog = SchemaCatalogReader::new(db);
    let mut tables = Vec::with_capacity(specs.len());

    for spec in specs {
        let live = catalog.list_columns(&spec.name).await?;
        let create = live.is_empty();
        let columns = if create {
            ColumnPlan::default()
        } else {
            ColumnPlan::compute(&spec.columns, &live)
        };
        let trigger_missing = !catalog
            .trigger_exists(&spec.name, &converge_sql::touch_trigger_name(&spec.name))
            .await?;

        tables.push(TablePlan {
            table: spec.name.clone(),
            create,
            columns,
            trigger_missing,
        });
    }

    Ok(SchemaPlan { tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{ReconcileOptions, reconcile_all};
    use crate::testing::FakeDatabase;

    fn notes() -> TableSpec {
        TableSpec::new(
            "notes",
            "CREATE TABLE IF NOT EXISTS notes (id SERIAL PRIMARY KEY, body TEXT, updated_at TIMESTAMPTZ)",
        )
        .column("id", "SERIAL PRIMARY KEY")
        .column("body", "TEXT")
        .column("updated_at", "TIMESTAMPTZ")
    }

    #[tokio::test]
    async fn test_plan_executes_nothing() {
        let db = FakeDatabase::new();
        db.seed_table("notes", &[("id", "SERIAL"), ("legacy_field", "TEXT")]);

        let plan = plan(&db, &[notes()]).await.unwrap();

        assert!(db.statements().is_empty());
        insta::assert_snapshot!(plan.to_string(), @r"
        Changes detected:

          notes:
            + body: TEXT
            + updated_at: TIMESTAMPTZ
            - legacy_field
            + trigger trg_notes_updated_at
        ");
    }

    #[tokio::test]
    async fn test_plan_for_missing_table() {
        let db = FakeDatabase::new();
        let plan = plan(&db, &[notes()]).await.unwrap();
        assert!(plan.tables[0].create);
        assert!(plan.tables[0].columns.is_empty());
        assert!(plan.tables[0].trigger_missing);
    }

    #[tokio::test]
    async fn test_plan_empty_after_reconcile() {
        let db = FakeDatabase::new();
        reconcile_all(&db, &[notes()], &ReconcileOptions::default())
            .await
            .unwrap();

        let plan = plan(&db, &[notes()]).await.unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "No changes detected.\n");
    }
}
