use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use crate::cli::commands::{emit_envelope, open_catalog, read_json_argument};
use crate::config::{EngineConfig, RuntimePaths};
use crate::context::ContextManager;
use crate::error::PipelineError;
use crate::models::{QueryEnvelope, RawIntent};
use crate::pipeline::{PreparedQuery, QueryPipeline, TurnRequest};
use crate::sqlite::{
    DEFAULT_ROW_CAP, SqliteContextStore, execute_descriptor, open_sqlite_connection,
};
use crate::validate::IntentValidator;

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    #[command(subcommand)]
    pub command: QueryCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum QueryCommand {
    /// Validate and compile an intent; print the query descriptor.
    Compile(QueryTurnArgs),
    /// Compile an intent and execute it against the local claims mart.
    Run(QueryRunArgs),
    /// Drop the stored context of a conversation thread.
    Forget(QueryForgetArgs),
}

#[derive(Debug, Clone, Args)]
pub struct QueryTurnArgs {
    /// Intent JSON, or `@path` to a file holding it.
    #[arg(long, value_name = "JSON")]
    pub intent: String,

    /// Conversation thread; refinements merge into its stored intent.
    #[arg(long, value_name = "ID")]
    pub thread: Option<String>,

    /// Tenant scope bound into the query.
    #[arg(long, value_name = "ID")]
    pub client: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct QueryRunArgs {
    #[command(flatten)]
    pub turn: QueryTurnArgs,

    #[arg(long, default_value_t = DEFAULT_ROW_CAP)]
    pub row_cap: usize,
}

#[derive(Debug, Clone, Args)]
pub struct QueryForgetArgs {
    #[arg(long, value_name = "ID")]
    pub thread: String,
}

pub fn run(args: &QueryArgs, runtime_paths: &RuntimePaths, config: &EngineConfig) -> Result<()> {
    match &args.command {
        QueryCommand::Compile(args) => run_compile(args, runtime_paths, config),
        QueryCommand::Run(args) => run_execute(args, runtime_paths, config),
        QueryCommand::Forget(args) => run_forget(args, runtime_paths),
    }
}

fn run_compile(
    args: &QueryTurnArgs,
    runtime_paths: &RuntimePaths,
    config: &EngineConfig,
) -> Result<()> {
    let prepared = prepare_turn("query.compile", args, runtime_paths, config)?;
    let data = json!({ "descriptor": prepared.descriptor });
    emit_envelope(&prepared_envelope("query.compile", &prepared, data))
}

fn run_execute(
    args: &QueryRunArgs,
    runtime_paths: &RuntimePaths,
    config: &EngineConfig,
) -> Result<()> {
    let prepared = prepare_turn("query.run", &args.turn, runtime_paths, config)?;

    let started = Instant::now();
    let connection = open_sqlite_connection(&runtime_paths.database_path)?;
    let result = execute_descriptor(&connection, &prepared.descriptor, args.row_cap).map_err(
        |error| {
            QueryEnvelope::error("query.run", "query_execution_failed", "compiled query failed")
                .with_meta("metric", json!(prepared.descriptor.metric))
                .with_error_details(json!({ "cause": format!("{error:#}") }))
                .into_failure()
        },
    )?;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    emit_envelope(
        &prepared_envelope(
            "query.run",
            &prepared,
            json!({
                "columns": result.column_names,
                "rows": result.rows,
            }),
        )
        .with_meta("chart_type", json!(prepared.descriptor.chart_type))
        .with_meta("row_count", json!(result.row_count))
        .with_meta("truncated", json!(result.truncated))
        .with_meta("row_cap", json!(args.row_cap))
        .with_meta("duration_ms", json!(duration_ms)),
    )
}

fn run_forget(args: &QueryForgetArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let context = ContextManager::new(Arc::new(SqliteContextStore::new(
        &runtime_paths.database_path,
    )));
    let cleared = context.forget(&args.thread)?;
    emit_envelope(&QueryEnvelope::ok(
        "query.forget",
        json!({ "thread": args.thread, "cleared": cleared }),
    ))
}

fn prepare_turn(
    command: &str,
    args: &QueryTurnArgs,
    runtime_paths: &RuntimePaths,
    config: &EngineConfig,
) -> Result<PreparedQuery> {
    let intent: RawIntent = read_json_argument(&args.intent, runtime_paths).map_err(|error| {
        QueryEnvelope::error(command, "intent_unreadable", "intent is not valid JSON")
            .with_error_details(json!({ "cause": format!("{error:#}") }))
            .into_failure()
    })?;

    let catalog = open_catalog(command, runtime_paths, config)?;
    let pipeline = QueryPipeline::new(
        catalog,
        IntentValidator::new(config.validation),
        ContextManager::new(Arc::new(SqliteContextStore::new(
            &runtime_paths.database_path,
        ))),
    );

    let request = TurnRequest {
        intent: &intent,
        thread_id: args.thread.as_deref(),
        client_id: args.client.as_deref(),
    };
    pipeline
        .prepare(request)
        .map_err(|error| pipeline_failure(command, &error))
}

fn pipeline_failure(command: &str, error: &PipelineError) -> anyhow::Error {
    match error {
        PipelineError::Validation(error) => QueryEnvelope::rejected(command, error).into_failure(),
        // Details stay in the log; the caller only learns that compilation broke.
        PipelineError::Compilation(_) => QueryEnvelope::error(
            command,
            "compilation_failed",
            "the query could not be compiled",
        )
        .into_failure(),
        PipelineError::Storage(error) => {
            QueryEnvelope::error(command, "storage_failure", error.to_string())
                .with_error_details(json!({ "timeout": error.is_timeout() }))
                .into_failure()
        }
    }
}

fn prepared_envelope(
    command: &str,
    prepared: &PreparedQuery,
    data: serde_json::Value,
) -> QueryEnvelope {
    let mut envelope = QueryEnvelope::ok(command, data)
        .with_meta("metric", json!(prepared.descriptor.metric))
        .with_meta("turn", json!(prepared.turn))
        .with_meta("turn_number", json!(prepared.turn_number))
        .with_meta("resolved_intent", json!(prepared.resolved_intent));
    for note in &prepared.notes {
        envelope = envelope.with_note(note.code, note.message.clone());
    }
    envelope
}
