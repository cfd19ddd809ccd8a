use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;
use tracing::info;

use crate::catalog::builtin::claims_catalog;
use crate::cli::commands::{emit_envelope, read_json_file};
use crate::config::RuntimePaths;
use crate::models::{MetricDefinition, QueryEnvelope};
use crate::sqlite::{
    ClaimRecord, DEFAULT_INSERT_BATCH_SIZE, SQLITE_SCHEMA_VERSION, ensure_sqlite_schema,
    insert_claims, open_sqlite_connection, upsert_metric_definitions,
};

#[derive(Debug, Clone, Args)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum DbCommand {
    /// Create the schema and seed the built-in claims metrics.
    Init(DbInitArgs),
    /// Load claims rows and optional metric definitions from JSON files.
    Seed(DbSeedArgs),
}

#[derive(Debug, Clone, Args)]
pub struct DbInitArgs {
    /// Create the schema only.
    #[arg(long)]
    pub skip_builtin_metrics: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DbSeedArgs {
    /// JSON array of claim rows.
    #[arg(long, value_name = "PATH")]
    pub claims: Option<PathBuf>,

    /// JSON array of metric definitions, upserted by slug.
    #[arg(long, value_name = "PATH")]
    pub metrics: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_INSERT_BATCH_SIZE)]
    pub batch_size: usize,
}

pub fn run(args: &DbArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    match &args.command {
        DbCommand::Init(args) => run_init(args, runtime_paths),
        DbCommand::Seed(args) => run_seed(args, runtime_paths),
    }
}

fn run_init(args: &DbInitArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let mut connection = open_sqlite_connection(&runtime_paths.database_path)?;
    ensure_sqlite_schema(&connection)?;

    let seeded = if args.skip_builtin_metrics {
        0
    } else {
        upsert_metric_definitions(&mut connection, &claims_catalog())?
    };
    info!(
        database = %runtime_paths.database_path.display(),
        seeded,
        "database initialized"
    );

    emit_envelope(&QueryEnvelope::ok(
        "db.init",
        json!({
            "database_path": runtime_paths.database_path.display().to_string(),
            "schema_version": SQLITE_SCHEMA_VERSION,
            "metrics_seeded": seeded,
        }),
    ))
}

fn run_seed(args: &DbSeedArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    if args.claims.is_none() && args.metrics.is_none() {
        return Err(QueryEnvelope::error(
            "db.seed",
            "nothing_to_seed",
            "pass --claims and/or --metrics",
        )
        .into_failure());
    }

    let mut connection = open_sqlite_connection(&runtime_paths.database_path)?;
    ensure_sqlite_schema(&connection)?;

    let metrics_written = match &args.metrics {
        Some(path) => {
            let definitions: Vec<MetricDefinition> = read_json_file(path, runtime_paths)
                .context("failed to load metric definitions")?;
            upsert_metric_definitions(&mut connection, &definitions)?
        }
        None => 0,
    };

    let claims_written = match &args.claims {
        Some(path) => {
            let claims: Vec<ClaimRecord> = read_json_file(path, runtime_paths)
                .context("failed to load claim rows")?;
            insert_claims(&mut connection, &claims, args.batch_size)?
        }
        None => 0,
    };
    info!(claims_written, metrics_written, "seed complete");

    emit_envelope(&QueryEnvelope::ok(
        "db.seed",
        json!({
            "database_path": runtime_paths.database_path.display().to_string(),
            "claims_written": claims_written,
            "metrics_written": metrics_written,
        }),
    ))
}
