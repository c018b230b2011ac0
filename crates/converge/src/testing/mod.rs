//! In-memory stand-in for Postgres, for testing code that reconciles schemas.
//!
//! [`FakeDatabase`] understands exactly the statements the reconciler issues
//! (`CREATE TABLE [IF NOT EXISTS]`, `ALTER TABLE ADD/DROP COLUMN`,
//! `DROP TABLE [IF EXISTS]`, `CREATE OR REPLACE FUNCTION`, `CREATE TRIGGER`,
//! and transaction/savepoint control) and records every statement it is
//! handed. Failures can be injected per statement or per catalog lookup.
//!
//! It is stricter than Postgres in one place: `CREATE TABLE IF NOT EXISTS`
//! on an existing table fails when a column it declares already exists with a
//! different type. Tests use it as a convenient way to make the initial
//! create fail; against Postgres the same situation is left to column
//! reconciliation.

mod parse;

use crate::DbError;
use crate::database::{Database, DbFuture};
use indexmap::{IndexMap, IndexSet};
use parse::{Cursor, check_definition, split_columns, type_word};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct Schema {
    /// table → ordered `(column, definition)`
    tables: IndexMap<String, Vec<(String, String)>>,
    functions: HashSet<String>,
    /// `(table, trigger)`; trigger names are only unique per table
    triggers: IndexSet<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    schema: Schema,
    /// `None` marks the snapshot taken at `BEGIN`.
    snapshots: Vec<(Option<String>, Schema)>,
    in_transaction: bool,
    aborted: bool,
    statements: Vec<String>,
    fail_patterns: Vec<String>,
    failing_catalogs: HashSet<String>,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct FakeDatabase {
    state: Mutex<State>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a table directly, bypassing the statement log.
    pub fn seed_table(&self, table: &str, columns: &[(&str, &str)]) {
        let columns = columns
            .iter()
            .map(|(n, d)| (n.to_string(), d.to_string()))
            .collect();
        self.state().schema.tables.insert(table.to_string(), columns);
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.state().schema.tables.contains_key(table)
    }

    /// Column names of `table` in order; empty if it does not exist.
    pub fn columns(&self, table: &str) -> Vec<String> {
        self.state()
            .schema
            .tables
            .get(table)
            .map(|cols| cols.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    pub fn column_definition(&self, table: &str, column: &str) -> Option<String> {
        self.state()
            .schema
            .tables
            .get(table)?
            .iter()
            .find(|(n, _)| n == column)
            .map(|(_, d)| d.clone())
    }

    pub fn triggers_on(&self, table: &str) -> Vec<String> {
        self.state()
            .schema
            .triggers
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Every statement handed to `execute_ddl`, including failed ones.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.state().statements.clear();
    }

    /// Make every statement containing `pattern` fail.
    pub fn fail_statements_containing(&self, pattern: &str) {
        self.state().fail_patterns.push(pattern.to_string());
    }

    /// Make column lookups for `table` fail.
    pub fn fail_catalog(&self, table: &str) {
        self.state().failing_catalogs.insert(table.to_string());
    }

    /// Sleep this long before executing each statement.
    pub fn delay_statements(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }
}

impl Database for FakeDatabase {
    fn execute_ddl<'a>(&'a self, sql: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            let delay = self.state().delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let result = self.state().execute(sql);
            result.map_err(DbError::Backend)
        })
    }

    fn column_names<'a>(&'a self, table: &'a str) -> DbFuture<'a, Vec<String>> {
        Box::pin(async move {
            let state = self.state();
            if state.failing_catalogs.contains(table) {
                return Err(DbError::Backend(format!(
                    "injected catalog failure for {}",
                    table
                )));
            }
            state.check_not_aborted().map_err(DbError::Backend)?;
            Ok(state
                .schema
                .tables
                .get(table)
                .map(|cols| cols.iter().map(|(n, _)| n.clone()).collect())
                .unwrap_or_default())
        })
    }

    fn trigger_exists<'a>(&'a self, table: &'a str, trigger: &'a str) -> DbFuture<'a, bool> {
        Box::pin(async move {
            let state = self.state();
            state.check_not_aborted().map_err(DbError::Backend)?;
            Ok(state
                .schema
                .triggers
                .contains(&(table.to_string(), trigger.to_string())))
        })
    }
}

impl State {
    fn check_not_aborted(&self) -> Result<(), String> {
        if self.aborted {
            Err(
                "current transaction is aborted, commands ignored until end of transaction block"
                    .to_string(),
            )
        } else {
            Ok(())
        }
    }

    fn execute(&mut self, sql: &str) -> Result<(), String> {
        self.statements.push(sql.to_string());

        if self.fail_patterns.iter().any(|p| sql.contains(p.as_str())) {
            if self.in_transaction {
                self.aborted = true;
            }
            return Err(format!("injected failure: {}", sql));
        }

        let mut c = Cursor::new(sql);
        if c.keywords(&["BEGIN"]) {
            self.in_transaction = true;
            self.aborted = false;
            self.snapshots = vec![(None, self.schema.clone())];
            return Ok(());
        }
        if c.keywords(&["COMMIT"]) {
            if self.aborted {
                self.restore_begin();
            }
            self.end_transaction();
            return Ok(());
        }
        if c.keywords(&["ROLLBACK", "TO", "SAVEPOINT"]) {
            let name = c.ident().ok_or("missing savepoint name")?;
            let index = self
                .snapshots
                .iter()
                .rposition(|(n, _)| n.as_deref() == Some(name.as_str()))
                .ok_or_else(|| format!("savepoint \"{}\" does not exist", name))?;
            self.schema = self.snapshots[index].1.clone();
            self.snapshots.truncate(index + 1);
            self.aborted = false;
            return Ok(());
        }
        if c.keywords(&["ROLLBACK"]) {
            self.restore_begin();
            self.end_transaction();
            return Ok(());
        }

        self.check_not_aborted()?;

        let result = if c.keywords(&["SAVEPOINT"]) {
            self.savepoint(c.ident().ok_or("missing savepoint name")?)
        } else if c.keywords(&["RELEASE", "SAVEPOINT"]) {
            self.release(c.ident().ok_or("missing savepoint name")?)
        } else {
            self.schema.apply(&mut c)
        };

        if result.is_err() && self.in_transaction {
            self.aborted = true;
        }
        result
    }

    fn savepoint(&mut self, name: String) -> Result<(), String> {
        if !self.in_transaction {
            return Err("SAVEPOINT can only be used in transaction blocks".to_string());
        }
        self.snapshots.push((Some(name), self.schema.clone()));
        Ok(())
    }

    fn release(&mut self, name: String) -> Result<(), String> {
        let index = self
            .snapshots
            .iter()
            .rposition(|(n, _)| n.as_deref() == Some(name.as_str()))
            .ok_or_else(|| format!("savepoint \"{}\" does not exist", name))?;
        self.snapshots.truncate(index);
        Ok(())
    }

    fn restore_begin(&mut self) {
        if let Some((_, schema)) = self.snapshots.first() {
            self.schema = schema.clone();
        }
    }

    fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.aborted = false;
        self.snapshots.clear();
    }
}

impl Schema {
    fn apply(&mut self, c: &mut Cursor<'_>) -> Result<(), String> {
        if c.keywords(&["CREATE", "TABLE"]) {
            let if_not_exists = c.keywords(&["IF", "NOT", "EXISTS"]);
            let table = c.ident().ok_or("missing table name")?;
            return self.create_table(table, if_not_exists, c.rest());
        }

        if c.keywords(&["DROP", "TABLE"]) {
            let if_exists = c.keywords(&["IF", "EXISTS"]);
            let table = c.ident().ok_or("missing table name")?;
            if self.tables.shift_remove(&table).is_none() && !if_exists {
                return Err(format!("table \"{}\" does not exist", table));
            }
            self.triggers.retain(|(t, _)| *t != table);
            return Ok(());
        }

        if c.keywords(&["ALTER", "TABLE"]) {
            let table = c.ident().ok_or("missing table name")?;
            let columns = self
                .tables
                .get_mut(&table)
                .ok_or_else(|| format!("relation \"{}\" does not exist", table))?;

            if c.keywords(&["ADD", "COLUMN"]) {
                let column = c.ident().ok_or("missing column name")?;
                let definition = c.rest().trim().trim_end_matches(';').trim().to_string();
                check_definition(&definition)?;
                if columns.iter().any(|(n, _)| *n == column) {
                    return Err(format!(
                        "column \"{}\" of relation \"{}\" already exists",
                        column, table
                    ));
                }
                columns.push((column, definition));
                return Ok(());
            }

            if c.keywords(&["DROP", "COLUMN"]) {
                let column = c.ident().ok_or("missing column name")?;
                let before = columns.len();
                columns.retain(|(n, _)| *n != column);
                if columns.len() == before {
                    return Err(format!(
                        "column \"{}\" of relation \"{}\" does not exist",
                        column, table
                    ));
                }
                return Ok(());
            }

            return Err(format!("unsupported ALTER TABLE: {}", c.rest()));
        }

        if c.keywords(&["CREATE", "OR", "REPLACE", "FUNCTION"]) {
            let function = c.ident().ok_or("missing function name")?;
            self.functions.insert(function);
            return Ok(());
        }

        if c.keywords(&["CREATE", "TRIGGER"]) {
            let trigger = c.ident().ok_or("missing trigger name")?;
            if !c.keywords(&["BEFORE", "UPDATE", "ON"]) {
                return Err(format!("unsupported trigger timing: {}", c.rest()));
            }
            let table = c.ident().ok_or("missing table name")?;
            if !c.keywords(&["FOR", "EACH", "ROW", "EXECUTE", "FUNCTION"]) {
                return Err(format!("unsupported trigger body: {}", c.rest()));
            }
            let function = c.ident().ok_or("missing function name")?;

            if !self.tables.contains_key(&table) {
                return Err(format!("relation \"{}\" does not exist", table));
            }
            if !self.functions.contains(&function) {
                return Err(format!("function {}() does not exist", function));
            }
            let key = (table, trigger);
            if self.triggers.contains(&key) {
                return Err(format!(
                    "trigger \"{}\" for relation \"{}\" already exists",
                    key.1, key.0
                ));
            }
            self.triggers.insert(key);
            return Ok(());
        }

        Err(format!("syntax error at or near \"{}\"", c.rest()))
    }

    fn create_table(&mut self, table: String, if_not_exists: bool, body: &str) -> Result<(), String> {
        let declared = split_columns(body)?;
        for (_, definition) in &declared {
            check_definition(definition)?;
        }

        match self.tables.get(&table) {
            Some(_) if !if_not_exists => Err(format!("relation \"{}\" already exists", table)),
            Some(existing) => {
                for (name, definition) in &declared {
                    if let Some((_, live)) = existing.iter().find(|(n, _)| n == name) {
                        if type_word(live) != type_word(definition) {
                            return Err(format!(
                                "column \"{}\" of existing relation \"{}\" is {} but {} was declared",
                                name,
                                table,
                                type_word(live),
                                type_word(definition)
                            ));
                        }
                    }
                }
                Ok(())
            }
            None => {
                self.tables.insert(table, declared);
                Ok(())
            }
        }
    }
}
