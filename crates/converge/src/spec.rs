//! Declared table shapes.
//!
//! A [`TableSpec`] is the authoritative description of one table: the full
//! `CREATE TABLE IF NOT EXISTS` text used to create it from scratch, and the
//! name → definition map the columns are reconciled against afterwards.
//!
//! ```ignore
//! let users = TableSpec::new(
//!     "users",
//!     "CREATE TABLE IF NOT EXISTS users (id SERIAL PRIMARY KEY, email TEXT NOT NULL)",
//! )
//! .column("id", "SERIAL PRIMARY KEY")
//! .column("email", "TEXT NOT NULL");
//! ```

use crate::{Error, Result};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Declared shape of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name, as stored in the catalog (unquoted names are lower-case).
    pub name: String,
    /// Full DDL creating the table; must be `CREATE TABLE IF NOT EXISTS`.
    pub create_statement: String,
    /// Column name → SQL definition, in declaration order.
    pub columns: IndexMap<String, String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, create_statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create_statement: create_statement.into(),
            columns: IndexMap::new(),
        }
    }

    /// Declare a column. Later declarations of the same name replace earlier ones.
    pub fn column(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.columns.insert(name.into(), definition.into());
        self
    }

    /// Whether the table declares an `updated_at` column for its touch trigger.
    pub fn has_updated_at(&self) -> bool {
        self.columns
            .keys()
            .any(|c| c.eq_ignore_ascii_case(converge_sql::UPDATED_AT_COLUMN))
    }
}

/// Reject declarations that can't be reconciled safely, before any DDL runs.
///
/// A create statement without `IF NOT EXISTS` would fail on every run once the
/// table exists and send it down the destructive drop-and-recreate path, so
/// it's refused here.
pub fn validate_specs(specs: &[TableSpec]) -> Result<()> {
    let mut seen_tables = HashSet::new();

    for spec in specs {
        if spec.name.trim().is_empty() {
            return Err(Error::InvalidSpec("table name is empty".to_string()));
        }

        if !seen_tables.insert(spec.name.to_lowercase()) {
            return Err(Error::InvalidSpec(format!(
                "table {} is declared more than once",
                spec.name
            )));
        }

        if !is_create_if_not_exists(&spec.create_statement) {
            return Err(Error::InvalidSpec(format!(
                "create statement for {} must start with CREATE TABLE IF NOT EXISTS",
                spec.name
            )));
        }

        if spec.columns.is_empty() {
            return Err(Error::InvalidSpec(format!(
                "table {} declares no columns",
                spec.name
            )));
        }

        let mut seen_columns = HashSet::new();
        for (column, definition) in &spec.columns {
            if column.trim().is_empty() {
                return Err(Error::InvalidSpec(format!(
                    "table {} declares a column with an empty name",
                    spec.name
                )));
            }
            if definition.trim().is_empty() {
                return Err(Error::InvalidSpec(format!(
                    "column {}.{} has an empty definition",
                    spec.name, column
                )));
            }
            // Catalog comparison is case-insensitive, so these would collide.
            if !seen_columns.insert(column.to_lowercase()) {
                return Err(Error::InvalidSpec(format!(
                    "column {}.{} is declared more than once",
                    spec.name, column
                )));
            }
        }
    }

    Ok(())
}

fn is_create_if_not_exists(sql: &str) -> bool {
    let words: Vec<String> = sql
        .split_whitespace()
        .take(6)
        .map(|w| w.to_ascii_uppercase())
        .collect();
    words.len() == 6 && words[..5] == ["CREATE", "TABLE", "IF", "NOT", "EXISTS"]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableSpec {
        TableSpec::new(
            "users",
            "CREATE TABLE IF NOT EXISTS users (id SERIAL PRIMARY KEY, email TEXT)",
        )
        .column("id", "SERIAL PRIMARY KEY")
        .column("email", "TEXT")
    }

    #[test]
    fn test_builder_keeps_declaration_order() {
        let spec = users().column("created_at", "TIMESTAMPTZ DEFAULT now()");
        let names: Vec<&str> = spec.columns.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "created_at"]);
    }

    #[test]
    fn test_valid_specs_pass() {
        assert!(validate_specs(&[users()]).is_ok());
        assert!(validate_specs(&[]).is_ok());
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut shouty = users();
        shouty.name = "USERS".to_string();
        let err = validate_specs(&[users(), shouty]).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(msg) if msg.contains("more than once")));
    }

    #[test]
    fn test_case_insensitive_duplicate_column_rejected() {
        let spec = users().column("Email", "TEXT");
        let err = validate_specs(&[spec]).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(msg) if msg.contains("users.Email")));
    }

    #[test]
    fn test_plain_create_table_rejected() {
        let spec = TableSpec::new("notes", "CREATE TABLE notes (id SERIAL)").column("id", "SERIAL");
        let err = validate_specs(&[spec]).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(msg) if msg.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_create_keyword_case_and_spacing_ignored() {
        let spec = TableSpec::new("notes", "create  table\n if not exists notes (id serial)")
            .column("id", "serial");
        assert!(validate_specs(&[spec]).is_ok());
    }

    #[test]
    fn test_empty_columns_rejected() {
        let spec = TableSpec::new("notes", "CREATE TABLE IF NOT EXISTS notes ()");
        assert!(validate_specs(&[spec]).is_err());
    }

    #[test]
    fn test_has_updated_at() {
        assert!(!users().has_updated_at());
        assert!(users().column("UPDATED_AT", "TIMESTAMPTZ").has_updated_at());
    }
}
