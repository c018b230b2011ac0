//! Converge a live Postgres schema to a declared set of tables at startup.
//!
//! This crate provides:
//! - Table declarations ([`TableSpec`]): create DDL plus a column map
//! - A reconciliation pass that creates missing tables, adds and drops
//!   columns, and installs an `updated_at` touch trigger on every table
//! - A read-only [`plan`] showing what a pass would change
//!
//! There are no migration files and no version table: the declarations are the
//! whole truth, and every pass diffs them against the catalog again.
//!
//! # Bootstrap
//!
//! Reconciliation runs once, before the service accepts traffic. Any error is
//! meant to stop startup:
//!
//! ```ignore
//! let conn = pool.get().await?;
//! let report = converge::reconcile_all(&conn.traced(), &tables(), &Default::default()).await?;
//! tracing::info!("{report}");
//! ```
//!
//! # Ordering
//!
//! Tables are processed in the order given. A table referenced by a foreign key
//! must come before the tables referencing it.
//!
//! # Data loss
//!
//! Column removal is destructive, and a table whose create statement fails is
//! dropped with `CASCADE` and recreated. See [`table`] for details.

mod catalog;
mod columns;
mod database;
mod error;
mod plan;
mod reconcile;
mod report;
mod spec;
pub mod table;
mod traced;
mod trigger;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{LiveColumnSet, SchemaCatalogReader};
pub use columns::{ColumnErrorPolicy, ColumnPlan, ColumnReconciler};
pub use database::{Database, DbFuture};
pub use error::{ColumnOp, DbError, Error, TableFailure};
pub use plan::{SchemaPlan, TablePlan, plan};
pub use reconcile::{ReconcileOptions, Reconciler, reconcile_all};
pub use report::{
    ColumnFailure, ColumnOutcome, Provisioning, ReconcileReport, TableReport, TriggerOutcome,
};
pub use spec::{TableSpec, validate_specs};
pub use table::TableProvisioner;
pub use traced::{Connection, ConnectionExt, TracedConn};
pub use trigger::TriggerProvisioner;

pub type Result<T> = std::result::Result<T, Error>;
