//! Table declarations for the service schema.
//!
//! Order matters: a table referenced by a foreign key is declared before the
//! tables referencing it.

use converge::TableSpec;

const ID: (&str, &str) = ("id", "SERIAL PRIMARY KEY");
const CREATED_AT: (&str, &str) = ("created_at", "TIMESTAMPTZ NOT NULL DEFAULT now()");
const UPDATED_AT: (&str, &str) = ("updated_at", "TIMESTAMPTZ NOT NULL DEFAULT now()");
const USER_ID: (&str, &str) = (
    "user_id",
    "INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE",
);

/// Every table the service uses, in creation order.
pub fn all() -> Vec<TableSpec> {
    vec![users(), tasks(), notes(), work_schedule()]
}

/// User accounts.
fn users() -> TableSpec {
    declare(
        "users",
        &[
            ID,
            ("email", "TEXT NOT NULL UNIQUE"),
            ("password_hash", "TEXT NOT NULL"),
            ("display_name", "TEXT"),
            CREATED_AT,
            UPDATED_AT,
        ],
        &[],
    )
}

/// Tasks owned by a user.
fn tasks() -> TableSpec {
    declare(
        "tasks",
        &[
            ID,
            USER_ID,
            ("title", "TEXT NOT NULL"),
            ("description", "TEXT"),
            ("status", "TEXT NOT NULL DEFAULT 'todo'"),
            ("due_date", "DATE"),
            CREATED_AT,
            UPDATED_AT,
        ],
        &["CHECK (status IN ('todo', 'in_progress', 'done'))"],
    )
}

/// Free-form notes, optionally attached to a task.
fn notes() -> TableSpec {
    declare(
        "notes",
        &[
            ID,
            USER_ID,
            ("task_id", "INTEGER REFERENCES tasks(id) ON DELETE SET NULL"),
            ("title", "TEXT NOT NULL"),
            ("body", "TEXT NOT NULL DEFAULT ''"),
            CREATED_AT,
            UPDATED_AT,
        ],
        &[],
    )
}

/// Weekly working hours, one row per user and weekday.
fn work_schedule() -> TableSpec {
    declare(
        "work_schedule",
        &[
            ID,
            USER_ID,
            ("day_of_week", "SMALLINT NOT NULL CHECK (day_of_week BETWEEN 0 AND 6)"),
            ("start_time", "TIME NOT NULL"),
            ("end_time", "TIME NOT NULL"),
            CREATED_AT,
            UPDATED_AT,
        ],
        &["UNIQUE (user_id, day_of_week)", "CHECK (start_time < end_time)"],
    )
}

/// Build a spec whose create statement is rendered from the same column list
/// it is reconciled against, plus table-level constraints.
fn declare(name: &str, columns: &[(&str, &str)], constraints: &[&str]) -> TableSpec {
    let body: Vec<String> = columns
        .iter()
        .map(|(column, definition)| format!("{} {}", column, definition))
        .chain(constraints.iter().map(|c| c.to_string()))
        .collect();
    let create = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        name,
        body.join(",\n    ")
    );

    columns
        .iter()
        .fold(TableSpec::new(name, create), |spec, (column, definition)| {
            spec.column(*column, *definition)
        })
}
