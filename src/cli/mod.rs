//! Command-line front end over a Postgres connection.

use crate::config::{CoordinatorConfig, DEFAULT_STATUS_TABLE};
use crate::connection::postgres::PgConnection;
use crate::core::QueryId;
use crate::dialect::PostgresDialect;
use crate::executor::Outcome;
use crate::status::StatusRow;
use crate::{Coordinator, TxError};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// sysexits `EX_TEMPFAIL`: another attempt holds the query id, try again later.
pub const EXIT_CONFLICT: u8 = 75;

#[derive(Parser)]
#[command(name = "idemsql")]
#[command(about = "Run SQL statements at most once, tracked in a status table")]
pub struct Cli {
    /// libpq-style connection string
    #[arg(long, env = "IDEMSQL_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides applied on top of `--config` (or the defaults).
#[derive(Args, Default)]
pub struct Settings {
    /// JSON file holding a coordinator configuration
    #[arg(long, env = "IDEMSQL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "IDEMSQL_STATUS_SCHEMA", global = true)]
    pub status_schema: Option<String>,

    /// Status table name [default: __idemsql_status]
    #[arg(long, env = "IDEMSQL_STATUS_TABLE", global = true)]
    pub status_table: Option<String>,

    /// Seconds a completed status row is kept
    #[arg(long, env = "IDEMSQL_RETENTION_SECS", global = true)]
    pub retention_secs: Option<u64>,

    /// Run statements without status tracking
    #[arg(long, global = true)]
    pub no_strict: bool,

    #[arg(long, env = "IDEMSQL_MAX_ATTEMPTS", global = true)]
    pub max_attempts: Option<usize>,

    #[arg(long, global = true)]
    pub base_backoff_ms: Option<u64>,

    #[arg(long, global = true)]
    pub max_backoff_ms: Option<u64>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Execute a statement unless it already completed for this query id
    Run {
        #[arg(long)]
        query_id: QueryId,
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        sql: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the status row for a query id as JSON
    Status {
        #[arg(long)]
        query_id: QueryId,
    },
    /// Delete completed rows older than the retention window
    Sweep {
        /// Keep sweeping every interval until interrupted
        #[arg(long)]
        watch: bool,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: Option<u64>,
    },
    /// Run a query inside a read-only transaction
    ReadOnly {
        #[arg(long)]
        sql: String,
    },
}

#[derive(Serialize)]
struct StatusReport {
    query_id: QueryId,
    state: &'static str,
    completed_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    fn new(query_id: QueryId, row: Option<StatusRow>) -> Self {
        match row {
            None => Self {
                query_id,
                state: "absent",
                completed_at: None,
            },
            Some(row) => Self {
                query_id,
                state: if row.is_complete() {
                    "completed"
                } else {
                    "incomplete"
                },
                completed_at: row.completed_at,
            },
        }
    }
}

impl Settings {
    pub fn resolve(&self) -> Result<CoordinatorConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => CoordinatorConfig::default(),
        };

        if let Some(schema) = &self.status_schema {
            config = config.status_table_schema(schema);
        }
        if let Some(table) = &self.status_table {
            config = config.status_table(table);
        }
        if let Some(secs) = self.retention_secs {
            config = config.retention(Duration::from_secs(secs));
        }
        if self.no_strict {
            config = config.strict_transaction(false);
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(base) = self.base_backoff_ms {
            config.retry.base_backoff_ms = base;
        }
        if let Some(max) = self.max_backoff_ms {
            config.retry.max_backoff_ms = max;
        }

        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<CoordinatorConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config '{}'", path.display()))
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.settings.resolve()?;
    let coordinator = Coordinator::new(config, Arc::new(PostgresDialect))?;

    let url = cli
        .database_url
        .ok_or_else(|| anyhow!("--database-url or IDEMSQL_DATABASE_URL is required"))?;
    let mut conn = PgConnection::connect(&url)
        .await
        .with_context(|| "Failed to connect to the database")?;

    match cli.command {
        Command::Run {
            query_id,
            sql,
            file,
        } => {
            let sql = match (sql, file) {
                (Some(sql), _) => sql,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read SQL file '{}'", path.display()))?,
                (None, None) => return Err(anyhow!("either --sql or --file is required")),
            };

            match coordinator.run(&mut conn, query_id, &sql).await {
                Ok(Outcome::Conflict) => {
                    eprintln!("Query {} is held by another attempt; retry later", query_id);
                    Ok(ExitCode::from(EXIT_CONFLICT))
                }
                Ok(outcome) => {
                    println!("Query {}: {}", query_id, outcome);
                    Ok(ExitCode::SUCCESS)
                }
                Err(err @ TxError::StatementFailed { .. }) => {
                    Err(anyhow!(err).context("Statement failed; re-run with the same query id"))
                }
                Err(err) => Err(err.into()),
            }
        }
        Command::Status { query_id } => {
            let row = coordinator.status(&mut conn, query_id).await?;
            let report = StatusReport::new(query_id, row);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Sweep {
            watch,
            interval_secs,
        } => {
            if !watch {
                let deleted = coordinator.sweep(&mut conn).await?;
                println!("Deleted {} expired status row(s)", deleted);
                return Ok(ExitCode::SUCCESS);
            }

            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or(coordinator.config().sweep_interval);
            let handle = coordinator.sweeper().clone().spawn(conn, interval);
            info!(?interval, "Sweeping until interrupted");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;
            handle.shutdown().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ReadOnly { sql } => {
            let result = coordinator.query_read_only(&mut conn, &sql).await?;
            result.print();
            Ok(ExitCode::SUCCESS)
        }
    }
}
