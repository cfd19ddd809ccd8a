use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::{Value, json};

use crate::cli::commands::{emit_envelope, open_catalog};
use crate::config::{EngineConfig, RuntimePaths};
use crate::models::{MetricDefinition, QueryEnvelope};

#[derive(Debug, Clone, Args)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub command: CatalogCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CatalogCommand {
    List,
    Show(CatalogShowArgs),
}

#[derive(Debug, Clone, Args)]
pub struct CatalogShowArgs {
    pub slug: String,
}

pub fn run(args: &CatalogArgs, runtime_paths: &RuntimePaths, config: &EngineConfig) -> Result<()> {
    match &args.command {
        CatalogCommand::List => run_list(runtime_paths, config),
        CatalogCommand::Show(args) => run_show(args, runtime_paths, config),
    }
}

fn run_list(runtime_paths: &RuntimePaths, config: &EngineConfig) -> Result<()> {
    let catalog = open_catalog("catalog.list", runtime_paths, config)?;
    let snapshot = catalog.snapshot();
    let metrics = snapshot
        .metrics()
        .map(|definition| metric_summary(definition))
        .collect::<Vec<_>>();

    emit_envelope(
        &QueryEnvelope::ok("catalog.list", json!({ "metrics": metrics }))
            .with_meta("status", json!(catalog.status()))
            .with_meta("rejected", json!(snapshot.rejected())),
    )
}

fn run_show(
    args: &CatalogShowArgs,
    runtime_paths: &RuntimePaths,
    config: &EngineConfig,
) -> Result<()> {
    let catalog = open_catalog("catalog.show", runtime_paths, config)?;
    let definition = catalog.lookup(&args.slug).map_err(|error| {
        QueryEnvelope::error("catalog.show", "metric_not_found", error.to_string())
            .with_error_details(json!({ "slug": args.slug }))
            .into_failure()
    })?;

    emit_envelope(&QueryEnvelope::ok(
        "catalog.show",
        json!({ "metric": definition.as_ref() }),
    ))
}

fn metric_summary(definition: &MetricDefinition) -> Value {
    json!({
        "slug": definition.slug,
        "display_name": definition.display_name,
        "category": definition.category,
        "unit": definition.unit,
        "result_shape": definition.result_shape,
        "default_chart": definition.default_chart,
        "dimensions": definition
            .dimensions
            .iter()
            .map(|binding| binding.key.as_str())
            .collect::<Vec<_>>(),
    })
}
