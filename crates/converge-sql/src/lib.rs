//! DDL text for schema reconciliation.
//!
//! Every statement the reconciler issues on its own (as opposed to the
//! `CREATE TABLE` text supplied with each table declaration) is rendered here,
//! so the exact SQL can be asserted without a database.
//!
//! Identifiers are always double-quoted to avoid issues with reserved keywords
//! like `user`, `order`, `table`, `group`, etc.

/// Longest identifier Postgres keeps; longer names are silently truncated.
pub const PG_IDENT_MAX: usize = 63;

/// Column stamped by the touch trigger.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use converge_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Quote a PostgreSQL identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Name of the function that stamps `updated_at` for rows of `table`.
///
/// # Examples
///
/// ```
/// assert_eq!(converge_sql::touch_function_name("tasks"), "touch_tasks_updated_at");
/// ```
pub fn touch_function_name(table: &str) -> String {
    bounded_name("touch_", table, "_updated_at")
}

/// Name of the `BEFORE UPDATE` trigger installed on `table`.
///
/// # Examples
///
/// ```
/// assert_eq!(converge_sql::touch_trigger_name("work_schedule"), "trg_work_schedule_updated_at");
/// ```
pub fn touch_trigger_name(table: &str) -> String {
    bounded_name("trg_", table, "_updated_at")
}

/// Build `{prefix}{table}{suffix}`, keeping it within [`PG_IDENT_MAX`].
///
/// If the plain name would be truncated by Postgres, the table part is cut and
/// a stable hash of the full table name is appended instead of the suffix, so
/// catalog lookups by name keep matching what Postgres actually stored.
fn bounded_name(prefix: &str, table: &str, suffix: &str) -> String {
    let plain = format!("{}{}{}", prefix, table, suffix);
    if plain.len() <= PG_IDENT_MAX {
        return plain;
    }

    let hex = blake3::hash(table.as_bytes()).to_hex().to_string();
    let hash = &hex[..16];

    let max_table_len = PG_IDENT_MAX.saturating_sub(prefix.len() + 1 + hash.len());
    let mut len = max_table_len.min(table.len());
    while len > 0 && !table.is_char_boundary(len) {
        len -= 1;
    }

    format!("{}{}_{}", prefix, &table[..len], hash)
}

/// `ALTER TABLE ... ADD COLUMN` with the declared definition appended verbatim.
pub fn add_column_sql(table: &str, column: &str, definition: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {};",
        quote_ident(table),
        quote_ident(column),
        definition.trim()
    )
}

/// `ALTER TABLE ... DROP COLUMN ... CASCADE`.
pub fn drop_column_sql(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {} CASCADE;",
        quote_ident(table),
        quote_ident(column)
    )
}

/// `DROP TABLE ... CASCADE`, removing dependent objects and all rows.
///
/// `IF EXISTS` keeps the fallback usable when the initial create failed
/// because of a non-table object, or the table was never created.
pub fn drop_table_cascade_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE;", quote_ident(table))
}

/// `CREATE OR REPLACE FUNCTION` for the touch trigger of `table`.
pub fn touch_function_sql(table: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {}() RETURNS trigger LANGUAGE plpgsql AS $$\n\
         BEGIN\n\
             NEW.{} = now();\n\
             RETURN NEW;\n\
         END;\n\
         $$;",
        quote_ident(&touch_function_name(table)),
        quote_ident(UPDATED_AT_COLUMN)
    )
}

/// `CREATE TRIGGER` wiring the touch function to updates of `table`.
///
/// There is no `IF NOT EXISTS` form; callers check the catalog first.
pub fn touch_trigger_sql(table: &str) -> String {
    format!(
        "CREATE TRIGGER {} BEFORE UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {}();",
        quote_ident(&touch_trigger_name(table)),
        quote_ident(table),
        quote_ident(&touch_function_name(table))
    )
}

/// `SAVEPOINT` / `ROLLBACK TO SAVEPOINT` / `RELEASE SAVEPOINT` for `name`.
pub fn savepoint_sql(name: &str) -> (String, String, String) {
    let ident = quote_ident(name);
    (
        format!("SAVEPOINT {};", ident),
        format!("ROLLBACK TO SAVEPOINT {};", ident),
        format!("RELEASE SAVEPOINT {};", ident),
    )
}
