use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use claimsight::anomaly::{AnomalyEngine, AnomalyEngineOptions, DailySeriesSource, DetectOptions};
use claimsight::catalog::MetricCatalog;
use claimsight::catalog::builtin::{
    avg_cycle_time_days, claim_volume, claims_by_status, claims_catalog,
};
use claimsight::context::{ContextManager, ContextStore, ConversationContext};
use claimsight::models::{ColumnBinding, Direction, RawIntent, RawTimeRange, Severity};
use claimsight::pipeline::{QueryPipeline, TurnRequest};
use claimsight::sqlite::{
    ClaimRecord, SqliteAnomalySink, SqliteContextStore, SqliteDailySeriesSource,
    ensure_sqlite_schema, execute_descriptor, insert_claims, list_anomaly_events,
    open_sqlite_connection,
};
use claimsight::utils::time::DateRange;
use claimsight::validate::IntentValidator;
use serde_json::{Value, json};
use time::macros::date;

fn temp_db_path(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("claimsight-it-{label}-{nanos}"))
        .join("claimsight.sqlite")
}

fn claim(id: &str, reported_at: &str, region: &str, paid: f64, reserve: f64) -> ClaimRecord {
    ClaimRecord {
        claim_id: id.to_string(),
        client_id: "acme".to_string(),
        reported_at: reported_at.to_string(),
        region: region.to_string(),
        status: "open".to_string(),
        line_of_business: "auto".to_string(),
        adjuster_id: Some("adj-1".to_string()),
        severity: "low".to_string(),
        sla_breached: false,
        paid_amount: paid,
        reserve_amount: reserve,
        cycle_time_days: Some(3.0),
    }
}

fn seeded_db(label: &str, claims: &[ClaimRecord]) -> PathBuf {
    let path = temp_db_path(label);
    let mut connection = open_sqlite_connection(&path).expect("sqlite should open");
    ensure_sqlite_schema(&connection).expect("schema should apply");
    insert_claims(&mut connection, claims, 2).expect("claims should insert");
    path
}

fn cleanup(path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

fn builtin_pipeline() -> QueryPipeline {
    QueryPipeline::new(
        Arc::new(MetricCatalog::from_definitions(claims_catalog())),
        IntentValidator::default(),
        ContextManager::in_memory(),
    )
}

#[test]
fn ratio_over_zero_reserves_yields_null_instead_of_failing() {
    let path = seeded_db(
        "ratio",
        &[
            claim("c-1", "2026-04-10", "west", 100.0, 0.0),
            claim("c-2", "2026-04-11", "west", 25.0, 0.0),
            claim("c-3", "2026-04-12", "east", 50.0, 100.0),
            claim("c-4", "2026-03-12", "east", 999.0, 1.0),
        ],
    );

    let intent = RawIntent {
        metric: Some("reserve_ratio_by_region".to_string()),
        time_range: Some(RawTimeRange {
            start: "2026-04-01".to_string(),
            end: "2026-04-30".to_string(),
        }),
        time_grain: Some("month".to_string()),
        ..RawIntent::default()
    };
    let prepared = builtin_pipeline()
        .prepare_at(
            TurnRequest {
                intent: &intent,
                thread_id: None,
                client_id: Some("acme"),
            },
            date!(2026-04-30),
        )
        .expect("intent should prepare");

    let connection = open_sqlite_connection(&path).expect("sqlite should reopen");
    let result =
        execute_descriptor(&connection, &prepared.descriptor, 100).expect("query should run");

    assert_eq!(result.column_names, vec!["label", "region", "value"]);
    assert_eq!(
        result.rows,
        vec![
            json!({ "label": "2026-04-01", "region": "east", "value": 0.5 }),
            json!({ "label": "2026-04-01", "region": "west", "value": Value::Null }),
        ]
    );
    assert!(!result.truncated);
    cleanup(&path);
}

#[test]
fn hostile_filter_values_are_bound_not_executed() {
    let path = seeded_db(
        "hostile",
        &[
            claim("c-1", "2026-04-10", "west", 10.0, 10.0),
            claim("c-2", "2026-04-10", "east", 10.0, 10.0),
        ],
    );

    let intent: RawIntent = serde_json::from_value(json!({
        "metric": "claim_volume",
        "filters": [{ "field": "region", "operator": "=", "value": "west' OR '1'='1" }],
        "time_range": { "start": "2026-04-01", "end": "2026-04-30" },
        "time_grain": "month"
    }))
    .expect("intent should decode");
    let prepared = builtin_pipeline()
        .prepare_at(TurnRequest::standalone(&intent), date!(2026-04-30))
        .expect("intent should prepare");

    let connection = open_sqlite_connection(&path).expect("sqlite should reopen");
    let result =
        execute_descriptor(&connection, &prepared.descriptor, 100).expect("query should run");
    assert!(result.rows.is_empty(), "unexpected rows: {:?}", result.rows);

    let tables = connection
        .query_row("SELECT COUNT(*) FROM claims", [], |row| row.get::<usize, i64>(0))
        .expect("claims table should still exist");
    assert_eq!(tables, 2);
    cleanup(&path);
}

#[test]
fn context_store_overwrites_per_thread() {
    let path = temp_db_path("context");
    let store = SqliteContextStore::new(&path);

    let first = ConversationContext {
        thread_id: "thread-1".to_string(),
        intent: RawIntent {
            metric: Some("claim_volume".to_string()),
            ..RawIntent::default()
        },
        turn_count: 1,
        updated_at_utc: "2026-04-01T00:00:00Z".to_string(),
    };
    store.save(&first).expect("first save should succeed");

    let second = ConversationContext {
        intent: RawIntent {
            metric: Some("sla_breach_rate".to_string()),
            ..RawIntent::default()
        },
        turn_count: 2,
        updated_at_utc: "2026-04-01T00:05:00Z".to_string(),
        ..first.clone()
    };
    store.save(&second).expect("second save should succeed");

    let loaded = store
        .load("thread-1")
        .expect("load should succeed")
        .expect("thread should exist");
    assert_eq!(loaded, second);
    assert_eq!(store.load("thread-2").expect("load should succeed"), None);

    assert!(store.clear("thread-1").expect("clear should succeed"));
    assert!(!store.clear("thread-1").expect("second clear should succeed"));
    cleanup(&path);
}

#[test]
fn detected_anomalies_are_persisted_and_listed_newest_first() {
    let daily_counts = [4, 5, 6, 5, 4, 5, 6, 5, 4, 30];
    let mut claims = Vec::new();
    for (offset, count) in daily_counts.iter().enumerate() {
        let day = format!("2026-04-{:02}", offset + 1);
        for index in 0..*count {
            claims.push(claim(&format!("c-{day}-{index}"), &day, "west", 10.0, 20.0));
        }
    }
    let path = seeded_db("anomaly", &claims);

    let engine = AnomalyEngine::new(
        Arc::new(MetricCatalog::from_definitions(claims_catalog())),
        Arc::new(SqliteDailySeriesSource::new(&path)),
        Arc::new(SqliteAnomalySink::new(&path)),
        AnomalyEngineOptions::default(),
    );
    let options = DetectOptions {
        metric_slugs: vec!["claim_volume".to_string(), "total_paid_amount".to_string()],
        lookback_days: 10,
        threshold: 2.0,
    };
    let report = engine
        .detect_at("acme", &options, date!(2026-04-10))
        .expect("scan should succeed");

    assert_eq!(report.window_start, "2026-04-01");
    assert_eq!(report.window_end, "2026-04-10");
    assert_eq!(report.evaluated, 2);
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(report.events.len(), 2);
    assert_eq!(report.persisted, 2);
    assert!(report.events.iter().all(|event| event.direction == Direction::Up));
    assert!(
        report
            .events
            .iter()
            .all(|event| event.severity == Severity::Critical)
    );

    let connection = open_sqlite_connection(&path).expect("sqlite should reopen");
    let listed = list_anomaly_events(&connection, Some("acme"), 10).expect("events should list");
    assert_eq!(listed.len(), 2);
    let volume = listed
        .iter()
        .find(|event| event.metric == "claim_volume")
        .expect("claim volume anomaly should be stored");
    assert_eq!(volume.current_value, 30.0);
    assert!((volume.baseline_mean - 44.0 / 9.0).abs() < 1e-9);

    let other_client =
        list_anomaly_events(&connection, Some("globex"), 10).expect("events should list");
    assert!(other_client.is_empty());
    cleanup(&path);
}

#[test]
fn days_without_claims_count_as_zero_and_collapse_is_flagged() {
    let daily_counts = [9, 10, 11, 10, 9, 10, 11, 10, 9];
    let mut claims = Vec::new();
    for (offset, count) in daily_counts.iter().enumerate() {
        let day = format!("2026-04-{:02}", offset + 1);
        for index in 0..*count {
            claims.push(claim(&format!("c-{day}-{index}"), &day, "west", 10.0, 20.0));
        }
    }
    let path = seeded_db("zero-day", &claims);
    let window = DateRange {
        start: date!(2026-04-01),
        end: date!(2026-04-10),
    };
    let source = SqliteDailySeriesSource::new(&path);

    let volume = source
        .fetch_daily_series("acme", &claim_volume(), window)
        .expect("volume series should load");
    assert_eq!(volume.points.len(), 10);
    let last = volume.points.last().expect("series should not be empty");
    assert_eq!(last.date, date!(2026-04-10));
    assert_eq!(last.value, 0.0);

    // An average has no value on a day without claims.
    let cycle_time = source
        .fetch_daily_series("acme", &avg_cycle_time_days(), window)
        .expect("cycle time series should load");
    assert_eq!(cycle_time.points.len(), 9);
    assert!(
        cycle_time
            .points
            .iter()
            .all(|point| point.date < date!(2026-04-10))
    );

    let engine = AnomalyEngine::new(
        Arc::new(MetricCatalog::from_definitions(claims_catalog())),
        Arc::new(source),
        Arc::new(SqliteAnomalySink::new(&path)),
        AnomalyEngineOptions::default(),
    );
    let options = DetectOptions {
        metric_slugs: vec!["claim_volume".to_string()],
        lookback_days: 10,
        threshold: 2.0,
    };
    let report = engine
        .detect_at("acme", &options, date!(2026-04-10))
        .expect("scan should succeed");

    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(report.events.len(), 1);
    let event = &report.events[0];
    assert_eq!(event.metric, "claim_volume");
    assert_eq!(event.direction, Direction::Down);
    assert_eq!(event.severity, Severity::Critical);
    assert_eq!(event.current_value, 0.0);
    cleanup(&path);
}

#[test]
fn keyword_dimension_keys_still_produce_runnable_sql() {
    let path = seeded_db(
        "keyword-alias",
        &[
            claim("c-1", "2026-04-10", "west", 10.0, 10.0),
            claim("c-2", "2026-04-11", "west", 10.0, 10.0),
            claim("c-3", "2026-04-12", "east", 10.0, 10.0),
        ],
    );
    let mut metric = claims_by_status();
    metric.dimensions = vec![
        ColumnBinding::new("group", "status"),
        ColumnBinding::new("order", "region"),
    ];
    let pipeline = QueryPipeline::new(
        Arc::new(MetricCatalog::from_definitions(vec![metric])),
        IntentValidator::default(),
        ContextManager::in_memory(),
    );
    let intent: RawIntent = serde_json::from_value(json!({
        "metric": "claims_by_status",
        "dimensions": ["order"],
        "time_range": { "start": "2026-04-01", "end": "2026-04-30" },
        "time_grain": "month"
    }))
    .expect("intent should decode");
    let prepared = pipeline
        .prepare_at(TurnRequest::standalone(&intent), date!(2026-04-30))
        .expect("intent should prepare");

    let connection = open_sqlite_connection(&path).expect("sqlite should reopen");
    let result =
        execute_descriptor(&connection, &prepared.descriptor, 100).expect("query should run");

    assert_eq!(result.column_names, vec!["label", "order", "value"]);
    assert_eq!(
        result.rows,
        vec![
            json!({ "label": "2026-04-01", "order": "east", "value": 1 }),
            json!({ "label": "2026-04-01", "order": "west", "value": 2 }),
        ]
    );
    cleanup(&path);
}
