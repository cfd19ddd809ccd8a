use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use crate::anomaly::{AnomalyEngine, AnomalyError};
use crate::cli::commands::{emit_envelope, open_catalog};
use crate::config::{EngineConfig, RuntimePaths};
use crate::models::QueryEnvelope;
use crate::sqlite::{
    SqliteAnomalySink, SqliteDailySeriesSource, ensure_sqlite_schema, list_anomaly_events,
    open_sqlite_connection,
};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Clone, Args)]
pub struct AnomalyArgs {
    #[command(subcommand)]
    pub command: AnomalyCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum AnomalyCommand {
    /// Score the latest day of each metric against its trailing baseline.
    Detect(AnomalyDetectArgs),
    /// Show persisted anomaly events, newest first.
    List(AnomalyListArgs),
}

#[derive(Debug, Clone, Args)]
pub struct AnomalyDetectArgs {
    #[arg(long, value_name = "ID")]
    pub client: String,

    /// Metric slug to scan; repeat for several. Omitted means every metric.
    #[arg(long = "metric", value_name = "SLUG")]
    pub metrics: Vec<String>,

    #[arg(long, value_name = "DAYS")]
    pub lookback_days: Option<u32>,

    #[arg(long)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Args)]
pub struct AnomalyListArgs {
    #[arg(long, value_name = "ID")]
    pub client: Option<String>,

    #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
    pub limit: usize,
}

pub fn run(args: &AnomalyArgs, runtime_paths: &RuntimePaths, config: &EngineConfig) -> Result<()> {
    match &args.command {
        AnomalyCommand::Detect(args) => run_detect(args, runtime_paths, config),
        AnomalyCommand::List(args) => run_list(args, runtime_paths),
    }
}

fn run_detect(
    args: &AnomalyDetectArgs,
    runtime_paths: &RuntimePaths,
    config: &EngineConfig,
) -> Result<()> {
    let catalog = open_catalog("anomaly.detect", runtime_paths, config)?;
    let engine = AnomalyEngine::new(
        catalog,
        Arc::new(SqliteDailySeriesSource::new(&runtime_paths.database_path)),
        Arc::new(SqliteAnomalySink::new(&runtime_paths.database_path)),
        config.anomaly_engine_options(),
    );

    let mut options = config.detect_options(args.metrics.clone());
    if let Some(lookback_days) = args.lookback_days {
        options.lookback_days = lookback_days;
    }
    if let Some(threshold) = args.threshold {
        options.threshold = threshold;
    }

    let report = engine
        .detect(&args.client, &options)
        .map_err(|error| match &error {
            AnomalyError::InvalidOptions(message) => {
                QueryEnvelope::error("anomaly.detect", "invalid_options", message.clone())
                    .into_failure()
            }
            AnomalyError::Persist { count, .. } => {
                QueryEnvelope::error("anomaly.detect", "persist_failed", error.to_string())
                    .with_error_details(json!({ "events": count }))
                    .into_failure()
            }
        })?;

    emit_envelope(
        &QueryEnvelope::ok("anomaly.detect", json!({ "report": report }))
            .with_meta("lookback_days", json!(options.lookback_days))
            .with_meta("threshold", json!(options.threshold)),
    )
}

fn run_list(args: &AnomalyListArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let connection = open_sqlite_connection(&runtime_paths.database_path)?;
    ensure_sqlite_schema(&connection)?;
    let events = list_anomaly_events(&connection, args.client.as_deref(), args.limit)?;
    emit_envelope(
        &QueryEnvelope::ok("anomaly.list", json!({ "events": events }))
            .with_meta("event_count", json!(events.len())),
    )
}
