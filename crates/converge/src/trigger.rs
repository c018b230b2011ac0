//! The `updated_at` touch trigger.
//!
//! The function is replaced on every pass (`CREATE OR REPLACE` is already
//! idempotent). `CREATE TRIGGER` has no `IF NOT EXISTS`, so the trigger is
//! only created when the catalog says it is missing.

use crate::catalog::SchemaCatalogReader;
use crate::database::Database;
use crate::report::TriggerOutcome;
use crate::{Error, Result};
use tracing::{error, info};

pub struct TriggerProvisioner<'a> {
    db: &'a dyn Database,
    catalog: SchemaCatalogReader<'a>,
}

impl<'a> TriggerProvisioner<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Self {
            db,
            catalog: SchemaCatalogReader::new(db),
        }
    }

    pub async fn ensure_updated_at_trigger(&self, table: &str) -> Result<TriggerOutcome> {
        let function_sql = converge_sql::touch_function_sql(table);
        self.execute(table, &function_sql).await?;

        let trigger = converge_sql::touch_trigger_name(table);
        if self.catalog.trigger_exists(table, &trigger).await? {
            return Ok(TriggerOutcome::AlreadyPresent);
        }

        self.execute(table, &converge_sql::touch_trigger_sql(table))
            .await?;
        info!(table, trigger = %trigger, "updated_at trigger created");
        Ok(TriggerOutcome::Created)
    }

    async fn execute(&self, table: &str, sql: &str) -> Result<()> {
        self.db.execute_ddl(sql).await.map_err(|source| {
            error!(table, error = %source, "trigger installation failed");
            Error::TriggerCreation {
                table: table.to_string(),
                source,
            }
        })
    }
}
