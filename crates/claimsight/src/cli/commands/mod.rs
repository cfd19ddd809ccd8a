pub mod anomaly;
pub mod catalog;
pub mod db;
pub mod intent;
pub mod query;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::catalog::MetricCatalog;
use crate::config::{EngineConfig, RuntimePaths};
use crate::models::QueryEnvelope;
use crate::sqlite::SqliteCatalogSource;

/// Writes the envelope as one JSON line on stdout.
pub(crate) fn emit_envelope(envelope: &QueryEnvelope) -> Result<()> {
    let encoded = serde_json::to_string(envelope).map_err(|error| {
        QueryEnvelope::error(
            envelope.command.clone(),
            "response_encode_failed",
            "failed to encode command response",
        )
        .with_error_details(json!({ "cause": error.to_string() }))
        .into_failure()
    })?;
    println!("{encoded}");
    Ok(())
}

/// Accepts inline JSON or `@path` to a JSON file.
pub(crate) fn read_json_argument<T: DeserializeOwned>(
    raw: &str,
    runtime_paths: &RuntimePaths,
) -> Result<T> {
    match raw.strip_prefix('@') {
        Some(path) => read_json_file(Path::new(path), runtime_paths),
        None => serde_json::from_str(raw).context("failed to parse inline JSON argument"),
    }
}

pub(crate) fn read_json_file<T: DeserializeOwned>(
    path: &Path,
    runtime_paths: &RuntimePaths,
) -> Result<T> {
    let path = runtime_paths.resolve(path)?;
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read JSON input: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse JSON input: {}", path.display()))
}

/// Catalog backed by the metric definitions table, loaded eagerly so that a
/// broken database surfaces here instead of as an empty catalog.
pub(crate) fn open_catalog(
    command: &str,
    runtime_paths: &RuntimePaths,
    config: &EngineConfig,
) -> Result<Arc<MetricCatalog>> {
    let catalog = MetricCatalog::new(
        Arc::new(SqliteCatalogSource::new(&runtime_paths.database_path)),
        config.catalog_options(),
    );
    catalog
        .refresh()
        .context("failed to load metric catalog")?;

    if catalog.snapshot().is_empty() {
        return Err(QueryEnvelope::error(
            command,
            "catalog_empty",
            "no metric definitions are loaded; run `claimsight db init` first",
        )
        .with_meta(
            "database_path",
            json!(runtime_paths.database_path.display().to_string()),
        )
        .into_failure());
    }

    Ok(Arc::new(catalog))
}
