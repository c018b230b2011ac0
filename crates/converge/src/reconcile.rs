//! The reconciliation pass.
//!
//! Tables are processed one at a time in declaration order (tables referenced
//! by foreign keys must be declared before the tables referencing them). For
//! each table: provision, reconcile columns, install the touch trigger, each
//! step awaited before the next.
//!
//! There is no rollback across tables: when a table fails, the tables before
//! it keep whatever was applied to them.

use crate::columns::{ColumnErrorPolicy, ColumnReconciler};
use crate::database::Database;
use crate::error::TableFailure;
use crate::report::{ReconcileReport, TableReport};
use crate::spec::{TableSpec, validate_specs};
use crate::table::TableProvisioner;
use crate::trigger::TriggerProvisioner;
use crate::{Error, Result};
use std::time::Duration;
use tracing::{Instrument, error, info, warn};

/// How a pass reacts to failures, and how long it may take.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Abort at the first failing table (default). When `false`, every table
    /// is attempted and all failures are returned together as
    /// [`Error::Aggregate`]. Catalog and transaction-control failures stop
    /// the pass either way.
    pub stop_on_first_error: bool,

    pub column_errors: ColumnErrorPolicy,

    /// Wrap each table's reconciliation in its own transaction.
    pub transactional: bool,

    /// Upper bound for the whole pass. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            stop_on_first_error: true,
            column_errors: ColumnErrorPolicy::default(),
            transactional: false,
            timeout: None,
        }
    }
}

/// Run one reconciliation pass over `specs` with the given options.
///
/// This is the single entry point a service calls during bootstrap, before it
/// starts serving. Any error is meant to stop the service from starting.
pub async fn reconcile_all(
    db: &dyn Database,
    specs: &[TableSpec],
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    Reconciler::new(db)
        .with_options(options.clone())
        .reconcile_all(specs)
        .await
}

pub struct Reconciler<'a> {
    db: &'a dyn Database,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Self {
            db,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn reconcile_all(&self, specs: &[TableSpec]) -> Result<ReconcileReport> {
        validate_specs(specs)?;

        let report = match self.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run(specs)).await {
                Ok(result) => result,
                Err(_) => {
                    error!(?limit, "schema reconciliation timed out");
                    Err(Error::Timeout(limit))
                }
            },
            None => self.run(specs).await,
        }?;

        info!(
            tables = report.tables.len(),
            changed = report.changed(),
            "schema reconciliation finished"
        );
        Ok(report)
    }

    async fn run(&self, specs: &[TableSpec]) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut failures = Vec::new();

        for spec in specs {
            let span = tracing::info_span!("reconcile_table", table = %spec.name);
            match self.reconcile_table(spec).instrument(span).await {
                Ok(table_report) => report.tables.push(table_report),
                Err(e) if self.options.stop_on_first_error || aborts_pass(&e) => {
                    error!(table = %spec.name, error = %e, "table reconciliation failed, aborting");
                    return Err(e);
                }
                Err(e) => {
                    error!(table = %spec.name, error = %e, "table reconciliation failed, continuing");
                    failures.push(TableFailure {
                        table: spec.name.clone(),
                        error: e,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(Error::Aggregate(failures))
        }
    }

    /// Provision, reconcile columns, then install the trigger for one table.
    pub async fn reconcile_table(&self, spec: &TableSpec) -> Result<TableReport> {
        if !spec.has_updated_at() {
            warn!(
                table = %spec.name,
                "table declares no updated_at column; its touch trigger will fail on update"
            );
        }

        if !self.options.transactional {
            return self.table_steps(spec).await;
        }

        self.transaction_control(spec, "BEGIN;").await?;
        match self.table_steps(spec).await {
            Ok(report) => {
                self.transaction_control(spec, "COMMIT;").await?;
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback_err) = self.transaction_control(spec, "ROLLBACK;").await {
                    error!(table = %spec.name, error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn table_steps(&self, spec: &TableSpec) -> Result<TableReport> {
        let guarded = self.options.transactional;

        let provisioning = TableProvisioner::new(self.db)
            .guarded(guarded)
            .ensure_table(spec)
            .await?;

        let columns = ColumnReconciler::new(self.db, self.options.column_errors)
            .guarded(guarded)
            .reconcile_columns(&spec.name, &spec.columns)
            .await?;

        let trigger = TriggerProvisioner::new(self.db)
            .ensure_updated_at_trigger(&spec.name)
            .await?;

        Ok(TableReport {
            table: spec.name.clone(),
            provisioning,
            columns,
            trigger,
        })
    }

    async fn transaction_control(&self, spec: &TableSpec, sql: &str) -> Result<()> {
        self.db
            .execute_ddl(sql)
            .await
            .map_err(|source| Error::Transaction {
                table: spec.name.clone(),
                source,
            })
    }
}

/// Failures no table after this one can recover from, whatever the options say.
///
/// Without the catalog nothing can be diffed, and after a failed
/// `BEGIN`/`COMMIT`/`ROLLBACK` the connection state is unknown.
fn aborts_pass(error: &Error) -> bool {
    matches!(error, Error::CatalogRead { .. } | Error::Transaction { .. })
}
