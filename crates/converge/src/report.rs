//! What a reconciliation pass did, per table.
//!
//! Reports are logged and returned to the caller; they are never persisted.

use crate::error::ColumnOp;

/// How the table itself was provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioning {
    /// `CREATE TABLE IF NOT EXISTS` succeeded (created, or already there).
    Ensured,
    /// The initial create failed; the table was dropped (with its data) and recreated.
    Recreated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Created,
    AlreadyPresent,
}

/// A column statement that failed but was tolerated by the column error policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFailure {
    pub column: String,
    pub op: ColumnOp,
    pub message: String,
}

/// Result of column reconciliation for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnOutcome {
    pub added: Vec<String>,
    pub dropped: Vec<String>,
    pub failures: Vec<ColumnFailure>,
}

impl ColumnOutcome {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub provisioning: Provisioning,
    pub columns: ColumnOutcome,
    pub trigger: TriggerOutcome,
}

impl TableReport {
    /// Whether anything beyond the always-issued idempotent statements happened.
    pub fn changed(&self) -> bool {
        self.provisioning == Provisioning::Recreated
            || !self.columns.added.is_empty()
            || !self.columns.dropped.is_empty()
            || self.trigger == TriggerOutcome::Created
    }
}

/// Reports for every table reconciled in a pass, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub tables: Vec<TableReport>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.tables.iter().any(|t| t.changed())
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let has_failures = self.tables.iter().any(|t| !t.columns.failures.is_empty());
        if !self.changed() && !has_failures {
            return writeln!(f, "Schema already up to date ({} tables).", self.tables.len());
        }

        writeln!(f, "Schema reconciled:\n")?;
        for table in &self.tables {
            if !table.changed() && table.columns.failures.is_empty() {
                continue;
            }
            writeln!(f, "  {}:", table.table)?;
            if table.provisioning == Provisioning::Recreated {
                writeln!(f, "    ! dropped and recreated")?;
            }
            for column in &table.columns.added {
                writeln!(f, "    + {}", column)?;
            }
            for column in &table.columns.dropped {
                writeln!(f, "    - {}", column)?;
            }
            for failure in &table.columns.failures {
                writeln!(
                    f,
                    "    ? {} {} failed: {}",
                    failure.op, failure.column, failure.message
                )?;
            }
            if table.trigger == TriggerOutcome::Created {
                writeln!(f, "    + trigger {}", converge_sql::touch_trigger_name(&table.table))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(table: &str) -> TableReport {
        TableReport {
            table: table.to_string(),
            provisioning: Provisioning::Ensured,
            columns: ColumnOutcome::default(),
            trigger: TriggerOutcome::AlreadyPresent,
        }
    }

    #[test]
    fn test_unchanged_report() {
        let report = ReconcileReport {
            tables: vec![quiet("users"), quiet("tasks")],
        };
        assert!(!report.changed());
        assert_eq!(report.to_string(), "Schema already up to date (2 tables).\n");
    }

    #[test]
    fn snapshot_changed_report() {
        let mut tasks = quiet("tasks");
        tasks.columns.added.push("priority".to_string());
        tasks.columns.dropped.push("legacy_field".to_string());
        tasks.trigger = TriggerOutcome::Created;

        let mut notes = quiet("notes");
        notes.provisioning = Provisioning::Recreated;

        let report = ReconcileReport {
            tables: vec![quiet("users"), tasks, notes],
        };

        assert!(report.changed());
        assert!(report.table("users").is_some_and(|t| !t.changed()));
        insta::assert_snapshot!(report.to_string(), @r"
        Schema reconciled:

          tasks:
            + priority
            - legacy_field
            + trigger trg_tasks_updated_at
          notes:
            ! dropped and recreated
        ");
    }
}
