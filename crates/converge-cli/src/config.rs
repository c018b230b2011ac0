//! Command-line and environment configuration.
//!
//! `.env` is loaded before arguments are parsed, so every flag with an `env`
//! fallback can also be set there.

use clap::{Args, ValueEnum};
use converge::{ColumnErrorPolicy, ReconcileOptions};
use std::time::Duration;

/// Where the schema lives.
#[derive(Debug, Clone, Args)]
pub struct DbArgs {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", value_name = "url", hide_env_values = true)]
    pub database_url: String,

    /// Maximum number of pooled connections
    #[arg(long, env = "CONVERGE_POOL_SIZE", default_value_t = 2)]
    pub pool_size: usize,
}

/// How a reconciliation pass behaves.
#[derive(Debug, Clone, Args)]
pub struct PassArgs {
    /// Give up after this many seconds (0 waits forever)
    #[arg(long, env = "CONVERGE_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Reconcile every table even after one fails, then report all failures
    #[arg(long)]
    pub keep_going: bool,

    /// Wrap each table in its own transaction
    #[arg(long)]
    pub transactional: bool,

    /// What a failed column addition or removal does to its table
    #[arg(long, value_enum, default_value_t = ColumnErrors::AbortOnAdd)]
    pub column_errors: ColumnErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColumnErrors {
    /// Failed additions abort the table, failed removals are logged
    AbortOnAdd,
    /// Any failure aborts the table
    Strict,
    /// Failures are logged and reported, the table continues
    Lenient,
}

impl From<ColumnErrors> for ColumnErrorPolicy {
    fn from(value: ColumnErrors) -> Self {
        match value {
            ColumnErrors::AbortOnAdd => ColumnErrorPolicy::AbortOnAdd,
            ColumnErrors::Strict => ColumnErrorPolicy::Strict,
            ColumnErrors::Lenient => ColumnErrorPolicy::Lenient,
        }
    }
}

impl PassArgs {
    pub fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            stop_on_first_error: !self.keep_going,
            column_errors: self.column_errors.into(),
            transactional: self.transactional,
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
        }
    }
}

/// Hide the password of a connection URL before it is displayed or logged.
pub fn mask_password(url: &str) -> String {
    // Simple masking: replace password between :// and @
    if let Some(start) = url.find("://") {
        if let Some(at) = url.rfind('@') {
            if at > start {
                let prefix = &url[..start + 3];
                let suffix = &url[at..];
                if let Some(colon) = url[start + 3..at].find(':') {
                    let user = &url[start + 3..start + 3 + colon];
                    return format!("{}{}:***{}", prefix, user, suffix);
                }
            }
        }
    }
    url.to_string()
}
