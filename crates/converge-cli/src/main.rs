//! Bootstrap host: reconcile the service schema, then exit.

mod config;
mod tables;

use clap::{Parser, Subcommand};
use config::{DbArgs, PassArgs, mask_password};
use converge::ConnectionExt;
use owo_colors::OwoColorize;
use std::process::ExitCode;
use tokio_postgres::NoTls;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Converge a live Postgres schema to the service's declared tables.
#[derive(Debug, Parser)]
#[command(name = "converge", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile the database with the declared tables (run before the service starts)
    Reconcile {
        #[command(flatten)]
        db: DbArgs,

        #[command(flatten)]
        pass: PassArgs,
    },
    /// Show what `reconcile` would change, without changing anything
    Plan {
        #[command(flatten)]
        db: DbArgs,
    },
    /// List the declared tables and their columns
    Tables,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid database configuration: {0}")]
    Config(#[from] deadpool_postgres::CreatePoolError),

    #[error("could not connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: deadpool_postgres::PoolError,
    },

    #[error(transparent)]
    Converge(#[from] converge::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("converge=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Reconcile { db, pass } => {
            let conn = connect(&db).await?;
            let report =
                converge::reconcile_all(&conn.traced(), &tables::all(), &pass.options()).await?;
            if report.changed() {
                print!("{}", report.green());
            } else {
                print!("{}", report);
            }
        }
        Commands::Plan { db } => {
            let conn = connect(&db).await?;
            let plan = converge::plan(&conn.traced(), &tables::all()).await?;
            print!("{}", plan);
        }
        Commands::Tables => {
            for spec in tables::all() {
                println!("{}", spec.name.bold());
                for (column, definition) in &spec.columns {
                    println!("  {} {}", column.cyan(), definition.dimmed());
                }
            }
        }
    }
    Ok(())
}

async fn connect(db: &DbArgs) -> Result<deadpool_postgres::Object, CliError> {
    let url = mask_password(&db.database_url);

    let mut cfg = deadpool_postgres::Config::new();
    cfg.url = Some(db.database_url.clone());
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(db.pool_size));
    let pool = cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)?;

    let conn = pool
        .get()
        .await
        .map_err(|source| CliError::Connect {
            url: url.clone(),
            source,
        })?;
    info!(database = %url, "connected");
    Ok(conn)
}
