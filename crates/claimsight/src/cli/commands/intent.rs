use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use crate::cli::commands::{emit_envelope, open_catalog, read_json_argument};
use crate::config::{EngineConfig, RuntimePaths};
use crate::models::{QueryEnvelope, RawIntent, intent_json_schema};
use crate::utils::time::format_iso_date;
use crate::validate::{IntentValidator, ValidatedIntent};

#[derive(Debug, Clone, Args)]
pub struct IntentArgs {
    #[command(subcommand)]
    pub command: IntentCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum IntentCommand {
    /// Print the JSON schema the translator must fill in.
    Schema,
    /// Check an intent against the catalog without compiling it.
    Validate(IntentValidateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct IntentValidateArgs {
    /// Intent JSON, or `@path` to a file holding it.
    #[arg(long, value_name = "JSON")]
    pub intent: String,
}

pub fn run(args: &IntentArgs, runtime_paths: &RuntimePaths, config: &EngineConfig) -> Result<()> {
    match &args.command {
        IntentCommand::Schema => emit_envelope(&QueryEnvelope::ok(
            "intent.schema",
            json!({ "schema": intent_json_schema() }),
        )),
        IntentCommand::Validate(args) => run_validate(args, runtime_paths, config),
    }
}

fn run_validate(
    args: &IntentValidateArgs,
    runtime_paths: &RuntimePaths,
    config: &EngineConfig,
) -> Result<()> {
    let intent: RawIntent = read_json_argument(&args.intent, runtime_paths).map_err(|error| {
        QueryEnvelope::error("intent.validate", "intent_unreadable", "intent is not valid JSON")
            .with_error_details(json!({ "cause": format!("{error:#}") }))
            .into_failure()
    })?;

    let catalog = open_catalog("intent.validate", runtime_paths, config)?;
    let validator = IntentValidator::new(config.validation);
    let validated = validator
        .validate(&intent, &catalog.snapshot())
        .map_err(|error| QueryEnvelope::rejected("intent.validate", &error).into_failure())?;

    let mut envelope = QueryEnvelope::ok("intent.validate", validated_summary(&validated));
    for note in validated.notes() {
        envelope = envelope.with_note(note.code, note.message.clone());
    }
    emit_envelope(&envelope)
}

fn validated_summary(validated: &ValidatedIntent) -> serde_json::Value {
    let range = validated.time_range();
    json!({
        "metric": validated.metric().slug,
        "result_shape": validated.metric().result_shape,
        "dimensions": validated.dimensions(),
        "filters": validated.filters(),
        "time_range": {
            "start": format_iso_date(range.start),
            "end": format_iso_date(range.end),
        },
        "time_grain": validated.time_grain(),
        "limit": validated.limit(),
        "chart_type": validated.chart_type(),
    })
}
