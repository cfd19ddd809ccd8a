use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error, Result, anyhow};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::anomaly::{AnomalyEventSink, DailySeriesSource};
use crate::catalog::CatalogSource;
use crate::compile::compile_totals;
use crate::context::{ContextStore, ConversationContext};
use crate::models::{
    AnomalyEvent, DailyMetricSeries, DailyPoint, Direction, MetricDefinition, QueryDescriptor,
    QueryParam, RawIntent, Severity,
};
use crate::utils::time::{DateRange, now_utc_rfc3339, parse_iso_date};
use crate::validate::ValidatedIntent;

pub const SQLITE_SCHEMA_VERSION: &str = "claimsight.v1.sqlite.v1";
pub const CLAIMS_TABLE: &str = crate::catalog::builtin::CLAIMS_TABLE;
pub const METRIC_DEFINITIONS_TABLE: &str = "metric_definitions";
pub const ANOMALY_EVENTS_TABLE: &str = "anomaly_events";
pub const CONVERSATION_CONTEXT_TABLE: &str = "conversation_context";
pub const SCHEMA_META_TABLE: &str = "claimsight_schema_meta";
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;
pub const DEFAULT_ROW_CAP: usize = 10_000;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_CLAIMS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS claims (
    claim_id TEXT NOT NULL PRIMARY KEY,
    client_id TEXT NOT NULL,
    reported_at TEXT NOT NULL,
    region TEXT NOT NULL,
    status TEXT NOT NULL,
    line_of_business TEXT NOT NULL,
    adjuster_id TEXT,
    severity TEXT NOT NULL,
    sla_breached INTEGER NOT NULL DEFAULT 0,
    paid_amount REAL NOT NULL DEFAULT 0,
    reserve_amount REAL NOT NULL DEFAULT 0,
    cycle_time_days REAL,
    CHECK (sla_breached IN (0, 1)),
    CHECK (paid_amount >= 0),
    CHECK (reserve_amount >= 0)
);
"#;

const CREATE_INDEX_CLAIMS_CLIENT_TIME_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_claims_client_reported
ON claims (client_id, reported_at);
"#;

const CREATE_METRIC_DEFINITIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS metric_definitions (
    slug TEXT NOT NULL PRIMARY KEY,
    definition_json TEXT NOT NULL,
    updated_at_utc TEXT NOT NULL
);
"#;

const CREATE_ANOMALY_EVENTS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS anomaly_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id TEXT NOT NULL,
    metric TEXT NOT NULL,
    direction TEXT NOT NULL,
    z_score REAL NOT NULL,
    current_value REAL NOT NULL,
    baseline_mean REAL NOT NULL,
    baseline_std_dev REAL NOT NULL,
    severity TEXT NOT NULL,
    detected_at_utc TEXT NOT NULL,
    CHECK (direction IN ('up', 'down')),
    CHECK (severity IN ('info', 'warning', 'critical'))
);
"#;

const CREATE_INDEX_ANOMALY_CLIENT_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_anomaly_events_client_detected
ON anomaly_events (client_id, detected_at_utc);
"#;

const CREATE_CONVERSATION_CONTEXT_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_context (
    thread_id TEXT NOT NULL PRIMARY KEY,
    intent_json TEXT NOT NULL,
    turn_count INTEGER NOT NULL,
    updated_at_utc TEXT NOT NULL,
    CHECK (turn_count >= 0)
);
"#;

const CREATE_META_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS claimsight_schema_meta (
    schema_version TEXT NOT NULL,
    applied_at_utc TEXT NOT NULL
);
"#;

const INSERT_CLAIM_SQL: &str = "INSERT OR REPLACE INTO claims (
    claim_id, client_id, reported_at, region, status, line_of_business, adjuster_id,
    severity, sla_breached, paid_amount, reserve_amount, cycle_time_days
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const INSERT_ANOMALY_EVENT_SQL: &str = "INSERT INTO anomaly_events (
    client_id, metric, direction, z_score, current_value, baseline_mean, baseline_std_dev,
    severity, detected_at_utc
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

#[must_use]
pub fn schema_statements() -> &'static [&'static str] {
    &[
        CREATE_CLAIMS_TABLE_SQL,
        CREATE_INDEX_CLAIMS_CLIENT_TIME_SQL,
        CREATE_METRIC_DEFINITIONS_TABLE_SQL,
        CREATE_ANOMALY_EVENTS_TABLE_SQL,
        CREATE_INDEX_ANOMALY_CLIENT_SQL,
        CREATE_CONVERSATION_CONTEXT_TABLE_SQL,
        CREATE_META_TABLE_SQL,
    ]
}

#[must_use]
pub fn create_schema_sql() -> String {
    schema_statements().join("\n")
}

pub fn open_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create sqlite parent directory: {}",
                parent.display()
            )
        })?;
    }

    let connection = Connection::open(path)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))?;
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .context("failed to set sqlite busy timeout")?;
    Ok(connection)
}

pub fn ensure_sqlite_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .context("failed to create sqlite schema")?;

    if schema_meta_has_version(connection, SQLITE_SCHEMA_VERSION)? {
        return Ok(());
    }

    connection
        .execute(
            &format!(
                "INSERT INTO {SCHEMA_META_TABLE} (schema_version, applied_at_utc) VALUES (?1, ?2)"
            ),
            params![SQLITE_SCHEMA_VERSION, now_utc_rfc3339()],
        )
        .context("failed to write sqlite schema meta row")?;

    Ok(())
}

fn schema_meta_has_version(connection: &Connection, schema_version: &str) -> Result<bool> {
    let query = format!(
        "SELECT EXISTS(SELECT 1 FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1 LIMIT 1)"
    );
    let exists = connection
        .query_row(&query, [schema_version], |row| row.get::<usize, i64>(0))
        .context("failed to query sqlite schema version metadata")?;
    Ok(exists != 0)
}

fn connect(path: &Path) -> Result<Connection> {
    let connection = open_sqlite_connection(path)?;
    ensure_sqlite_schema(&connection)?;
    Ok(connection)
}

/// One row of the claims mart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: String,
    pub client_id: String,
    /// `YYYY-MM-DD` or an RFC 3339 timestamp; both sort lexically.
    pub reported_at: String,
    pub region: String,
    pub status: String,
    pub line_of_business: String,
    #[serde(default)]
    pub adjuster_id: Option<String>,
    pub severity: String,
    #[serde(default)]
    pub sla_breached: bool,
    #[serde(default)]
    pub paid_amount: f64,
    #[serde(default)]
    pub reserve_amount: f64,
    #[serde(default)]
    pub cycle_time_days: Option<f64>,
}

pub fn insert_claims(
    connection: &mut Connection,
    claims: &[ClaimRecord],
    batch_size: usize,
) -> Result<usize> {
    let mut written = 0usize;
    for batch in claims.chunks(batch_size.max(1)) {
        let tx = connection
            .transaction()
            .context("failed to open sqlite transaction")?;
        {
            let mut statement = tx
                .prepare_cached(INSERT_CLAIM_SQL)
                .context("failed to prepare claim insert statement")?;
            for claim in batch {
                statement
                    .execute(params![
                        claim.claim_id,
                        claim.client_id,
                        claim.reported_at,
                        claim.region,
                        claim.status,
                        claim.line_of_business,
                        claim.adjuster_id,
                        claim.severity,
                        i64::from(claim.sla_breached),
                        claim.paid_amount,
                        claim.reserve_amount,
                        claim.cycle_time_days,
                    ])
                    .with_context(|| format!("failed to insert claim_id={}", claim.claim_id))?;
                written += 1;
            }
        }
        tx.commit()
            .context("failed to commit claim batch transaction")?;
    }
    Ok(written)
}

pub fn upsert_metric_definitions(
    connection: &mut Connection,
    definitions: &[MetricDefinition],
) -> Result<usize> {
    let updated_at_utc = now_utc_rfc3339();
    let tx = connection
        .transaction()
        .context("failed to open sqlite transaction")?;
    {
        let mut statement = tx
            .prepare_cached(&format!(
                "INSERT INTO {METRIC_DEFINITIONS_TABLE} (slug, definition_json, updated_at_utc)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(slug) DO UPDATE SET
                     definition_json = excluded.definition_json,
                     updated_at_utc = excluded.updated_at_utc"
            ))
            .context("failed to prepare metric definition upsert")?;
        for definition in definitions {
            let encoded = serde_json::to_string(definition)
                .with_context(|| format!("failed to encode metric `{}`", definition.slug))?;
            statement
                .execute(params![definition.slug, encoded, updated_at_utc])
                .with_context(|| format!("failed to upsert metric `{}`", definition.slug))?;
        }
    }
    tx.commit()
        .context("failed to commit metric definition upsert")?;
    Ok(definitions.len())
}

/// Rows whose JSON no longer decodes are logged and left out; the catalog
/// applies its own checks to everything that does decode.
pub fn load_metric_definitions(connection: &Connection) -> Result<Vec<MetricDefinition>> {
    let mut statement = connection
        .prepare(&format!(
            "SELECT slug, definition_json FROM {METRIC_DEFINITIONS_TABLE} ORDER BY slug ASC"
        ))
        .context("failed to prepare metric definition query")?;
    let rows = statement
        .query_map([], |row| {
            Ok((row.get::<usize, String>(0)?, row.get::<usize, String>(1)?))
        })
        .context("failed to query metric definitions")?;

    let mut definitions = Vec::new();
    for row in rows {
        let (slug, encoded) = row.context("failed to read metric definition row")?;
        match serde_json::from_str::<MetricDefinition>(&encoded) {
            Ok(definition) => definitions.push(definition),
            Err(error) => warn!(%slug, %error, "skipping undecodable metric definition"),
        }
    }
    Ok(definitions)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryExecution {
    pub column_names: Vec<String>,
    pub rows: Vec<Value>,
    pub row_count: usize,
    pub truncated: bool,
}

/// Runs a compiled descriptor with its bound parameters, keeping at most
/// `row_cap` rows.
pub fn execute_descriptor(
    connection: &Connection,
    descriptor: &QueryDescriptor,
    row_cap: usize,
) -> Result<QueryExecution> {
    let mut statement = connection
        .prepare(&descriptor.template)
        .map_err(|error| Error::new(error).context("failed to prepare compiled query"))?;
    let column_names = statement
        .column_names()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    let params = descriptor.params.iter().map(sql_value_from_param);
    let mut rows = statement
        .query(params_from_iter(params))
        .map_err(|error| Error::new(error).context("failed to execute compiled query"))?;
    let mut result_rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows
        .next()
        .map_err(|error| Error::new(error).context("failed to fetch query row"))?
    {
        if result_rows.len() >= row_cap {
            truncated = true;
            break;
        }

        let mut record = serde_json::Map::new();
        for (index, column_name) in column_names.iter().enumerate() {
            let value = row
                .get::<usize, SqlValue>(index)
                .map_err(|error| Error::new(error).context("failed to decode query column"))?;
            record.insert(column_name.clone(), json_value_from_sql(value));
        }
        result_rows.push(Value::Object(record));
    }

    debug!(
        metric = %descriptor.metric,
        rows = result_rows.len(),
        truncated,
        "executed compiled query"
    );

    Ok(QueryExecution {
        column_names,
        row_count: result_rows.len(),
        rows: result_rows,
        truncated,
    })
}

fn sql_value_from_param(param: &QueryParam) -> SqlValue {
    match param {
        QueryParam::Text(value) => SqlValue::Text(value.clone()),
        QueryParam::Integer(value) => SqlValue::Integer(*value),
    }
}

fn json_value_from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => json!(value),
        SqlValue::Real(value) => json!(value),
        SqlValue::Text(value) => json!(value),
        SqlValue::Blob(value) => json!(format!("blob:{} bytes", value.len())),
    }
}

/// Catalog definitions stored in the `metric_definitions` table.
#[derive(Debug, Clone)]
pub struct SqliteCatalogSource {
    path: PathBuf,
}

impl SqliteCatalogSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CatalogSource for SqliteCatalogSource {
    fn fetch_definitions(&self) -> Result<Vec<MetricDefinition>> {
        let connection = connect(&self.path)?;
        load_metric_definitions(&connection)
    }
}

/// Daily totals computed from the claims mart through the query compiler, so
/// the anomaly engine sees the same numbers a chart would.
#[derive(Debug, Clone)]
pub struct SqliteDailySeriesSource {
    path: PathBuf,
}

impl SqliteDailySeriesSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DailySeriesSource for SqliteDailySeriesSource {
    fn fetch_daily_series(
        &self,
        client_id: &str,
        metric: &MetricDefinition,
        window: DateRange,
    ) -> Result<DailyMetricSeries> {
        let intent = ValidatedIntent::daily_totals(Arc::new(metric.clone()), window)
            .scoped_to_client(client_id);
        let descriptor = compile_totals(&intent)
            .with_context(|| format!("failed to compile daily totals for `{}`", metric.slug))?;

        let connection = connect(&self.path)?;
        let execution = execute_descriptor(&connection, &descriptor, DEFAULT_ROW_CAP)?;

        let mut observed = BTreeMap::new();
        for row in &execution.rows {
            let label = row
                .get("label")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("daily totals row for `{}` has no label", metric.slug))?;
            observed.insert(
                parse_iso_date(label)?,
                row.get("value").and_then(Value::as_f64),
            );
        }

        // A day without claims is a real zero for counts and sums. Averages,
        // rates and ratios are undefined there, so those days are left out.
        let additive = !metric.aggregation.has_denominator();
        let points = window
            .days()
            .filter_map(|date| {
                let value = observed.get(&date).copied().flatten();
                match value {
                    Some(value) => Some(DailyPoint { date, value }),
                    None if additive => Some(DailyPoint { date, value: 0.0 }),
                    None => None,
                }
            })
            .collect();

        Ok(DailyMetricSeries {
            metric: metric.slug.clone(),
            points,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteAnomalySink {
    path: PathBuf,
}

impl SqliteAnomalySink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AnomalyEventSink for SqliteAnomalySink {
    /// All events of a run land in one transaction.
    fn persist_events(&self, events: &[AnomalyEvent]) -> Result<usize> {
        let mut connection = connect(&self.path)?;
        let tx = connection
            .transaction()
            .context("failed to open sqlite transaction")?;
        {
            let mut statement = tx
                .prepare_cached(INSERT_ANOMALY_EVENT_SQL)
                .context("failed to prepare anomaly insert statement")?;
            for event in events {
                statement
                    .execute(params![
                        event.client_id,
                        event.metric,
                        event.direction.as_str(),
                        event.z_score,
                        event.current_value,
                        event.baseline_mean,
                        event.baseline_std_dev,
                        event.severity.as_str(),
                        event.detected_at_utc,
                    ])
                    .with_context(|| format!("failed to insert anomaly for `{}`", event.metric))?;
            }
        }
        tx.commit()
            .context("failed to commit anomaly batch transaction")?;
        Ok(events.len())
    }
}

/// Newest first.
pub fn list_anomaly_events(
    connection: &Connection,
    client_id: Option<&str>,
    limit: usize,
) -> Result<Vec<AnomalyEvent>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut statement = connection
        .prepare(&format!(
            "SELECT client_id, metric, direction, z_score, current_value, baseline_mean,
                    baseline_std_dev, severity, detected_at_utc
             FROM {ANOMALY_EVENTS_TABLE}
             WHERE (?1 IS NULL OR client_id = ?1)
             ORDER BY detected_at_utc DESC, event_id DESC
             LIMIT ?2"
        ))
        .context("failed to prepare anomaly event query")?;
    let rows = statement
        .query_map(params![client_id, limit], |row| {
            Ok((
                row.get::<usize, String>(0)?,
                row.get::<usize, String>(1)?,
                row.get::<usize, String>(2)?,
                row.get::<usize, f64>(3)?,
                row.get::<usize, f64>(4)?,
                row.get::<usize, f64>(5)?,
                row.get::<usize, f64>(6)?,
                row.get::<usize, String>(7)?,
                row.get::<usize, String>(8)?,
            ))
        })
        .context("failed to query anomaly events")?;

    let mut events = Vec::new();
    for row in rows {
        let (
            client_id,
            metric,
            direction,
            z_score,
            current_value,
            baseline_mean,
            baseline_std_dev,
            severity,
            detected_at_utc,
        ) = row.context("failed to read anomaly event row")?;
        events.push(AnomalyEvent {
            client_id,
            direction: Direction::parse(&direction)
                .ok_or_else(|| anyhow!("unknown anomaly direction `{direction}`"))?,
            severity: Severity::parse(&severity)
                .ok_or_else(|| anyhow!("unknown anomaly severity `{severity}`"))?,
            metric,
            z_score,
            current_value,
            baseline_mean,
            baseline_std_dev,
            detected_at_utc,
        });
    }
    Ok(events)
}

/// Conversation context persisted per thread; `save` replaces the thread's
/// row, so concurrent turns on one thread are last-write-wins.
#[derive(Debug, Clone)]
pub struct SqliteContextStore {
    path: PathBuf,
}

impl SqliteContextStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ContextStore for SqliteContextStore {
    fn load(&self, thread_id: &str) -> Result<Option<ConversationContext>> {
        let connection = connect(&self.path)?;
        let row = connection
            .query_row(
                &format!(
                    "SELECT intent_json, turn_count, updated_at_utc
                     FROM {CONVERSATION_CONTEXT_TABLE} WHERE thread_id = ?1"
                ),
                [thread_id],
                |row| {
                    Ok((
                        row.get::<usize, String>(0)?,
                        row.get::<usize, i64>(1)?,
                        row.get::<usize, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query conversation context")?;

        let Some((intent_json, turn_count, updated_at_utc)) = row else {
            return Ok(None);
        };
        let intent = serde_json::from_str::<RawIntent>(&intent_json)
            .with_context(|| format!("failed to decode context for thread `{thread_id}`"))?;
        Ok(Some(ConversationContext {
            thread_id: thread_id.to_string(),
            intent,
            turn_count: u32::try_from(turn_count).unwrap_or(u32::MAX),
            updated_at_utc,
        }))
    }

    fn save(&self, context: &ConversationContext) -> Result<()> {
        let connection = connect(&self.path)?;
        let intent_json =
            serde_json::to_string(&context.intent).context("failed to encode intent context")?;
        connection
            .execute(
                &format!(
                    "INSERT INTO {CONVERSATION_CONTEXT_TABLE}
                         (thread_id, intent_json, turn_count, updated_at_utc)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(thread_id) DO UPDATE SET
                         intent_json = excluded.intent_json,
                         turn_count = excluded.turn_count,
                         updated_at_utc = excluded.updated_at_utc"
                ),
                params![
                    context.thread_id,
                    intent_json,
                    i64::from(context.turn_count),
                    context.updated_at_utc
                ],
            )
            .with_context(|| format!("failed to save context for thread `{}`", context.thread_id))?;
        Ok(())
    }

    fn clear(&self, thread_id: &str) -> Result<bool> {
        let connection = connect(&self.path)?;
        let removed = connection
            .execute(
                &format!("DELETE FROM {CONVERSATION_CONTEXT_TABLE} WHERE thread_id = ?1"),
                [thread_id],
            )
            .with_context(|| format!("failed to clear context for thread `{thread_id}`"))?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::{Connection, params};

    use super::{
        ANOMALY_EVENTS_TABLE, CLAIMS_TABLE, CONVERSATION_CONTEXT_TABLE, METRIC_DEFINITIONS_TABLE,
        SCHEMA_META_TABLE, SQLITE_SCHEMA_VERSION, ensure_sqlite_schema, load_metric_definitions,
        upsert_metric_definitions,
    };
    use crate::catalog::builtin;

    #[test]
    fn ensure_schema_creates_mart_tables() {
        let connection = Connection::open_in_memory().expect("in-memory sqlite should open");
        ensure_sqlite_schema(&connection).expect("schema creation should succeed");

        for table in [
            CLAIMS_TABLE,
            METRIC_DEFINITIONS_TABLE,
            ANOMALY_EVENTS_TABLE,
            CONVERSATION_CONTEXT_TABLE,
            SCHEMA_META_TABLE,
        ] {
            assert!(table_exists(&connection, table), "{table}");
        }
    }

    #[test]
    fn ensure_schema_is_idempotent_and_preserves_schema_version_metadata() {
        let connection = Connection::open_in_memory().expect("in-memory sqlite should open");
        ensure_sqlite_schema(&connection).expect("first schema ensure should succeed");
        ensure_sqlite_schema(&connection).expect("second schema ensure should succeed");

        let query = format!("SELECT COUNT(*) FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1");
        let count = connection
            .query_row(&query, [SQLITE_SCHEMA_VERSION], |row| {
                row.get::<usize, i64>(0)
            })
            .expect("schema meta query should succeed");
        assert_eq!(count, 1);
    }

    #[test]
    fn stored_definitions_reload_and_bad_rows_are_skipped() {
        let mut connection = Connection::open_in_memory().expect("in-memory sqlite should open");
        ensure_sqlite_schema(&connection).expect("schema creation should succeed");

        let definitions = builtin::claims_catalog();
        let written = upsert_metric_definitions(&mut connection, &definitions)
            .expect("definitions should upsert");
        assert_eq!(written, definitions.len());
        upsert_metric_definitions(&mut connection, &definitions)
            .expect("second upsert should replace rows");

        connection
            .execute(
                &format!(
                    "INSERT INTO {METRIC_DEFINITIONS_TABLE} (slug, definition_json, updated_at_utc)
                     VALUES (?1, ?2, ?3)"
                ),
                params!["broken", "{not json", "2026-01-01T00:00:00.000Z"],
            )
            .expect("broken row should insert");

        let loaded = load_metric_definitions(&connection).expect("definitions should load");
        assert_eq!(loaded.len(), definitions.len());
        assert!(loaded.iter().any(|definition| definition == &builtin::adjuster_workload()));
    }

    fn table_exists(connection: &Connection, table_name: &str) -> bool {
        connection
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                [table_name],
                |_| Ok(()),
            )
            .is_ok()
    }
}
