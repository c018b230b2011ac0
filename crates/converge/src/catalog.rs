//! Live schema introspection.

use crate::database::Database;
use crate::{Error, Result};
use std::collections::HashSet;

/// Column names currently present on a table, in catalog order.
///
/// Read fresh on every pass and never persisted. Membership checks are
/// case-insensitive; [`iter`](Self::iter) yields the exact catalog spelling,
/// which is what `DROP COLUMN` needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveColumnSet {
    names: Vec<String>,
}

impl LiveColumnSet {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(column))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// An empty set means the table does not exist.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Lower-cased names, for comparison against declared columns.
    pub fn normalized(&self) -> HashSet<String> {
        self.names.iter().map(|n| n.to_lowercase()).collect()
    }
}

/// Read-only access to the database catalog.
///
/// Any failure here is fatal: reconciliation cannot diff without it.
pub struct SchemaCatalogReader<'a> {
    db: &'a dyn Database,
}

impl<'a> SchemaCatalogReader<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Self { db }
    }

    /// Columns of `table`; empty (not an error) if the table does not exist.
    pub async fn list_columns(&self, table: &str) -> Result<LiveColumnSet> {
        let names = self
            .db
            .column_names(table)
            .await
            .map_err(|source| Error::CatalogRead {
                object: format!("table {}", table),
                source,
            })?;
        Ok(LiveColumnSet::new(names))
    }

    /// Whether `table` already carries a trigger named `trigger`.
    pub async fn trigger_exists(&self, table: &str, trigger: &str) -> Result<bool> {
        self.db
            .trigger_exists(table, trigger)
            .await
            .map_err(|source| Error::CatalogRead {
                object: format!("trigger {}", trigger),
                source,
            })
    }
}
