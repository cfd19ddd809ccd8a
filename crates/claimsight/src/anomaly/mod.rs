pub mod stats;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Date;
use tracing::{info, warn};

use crate::catalog::MetricCatalog;
use crate::error::StorageError;
use crate::models::{AnomalyEvent, DailyMetricSeries, MetricDefinition};
use crate::utils::deadline::{PendingFetch, spawn_fetch};
use crate::utils::time::{DateRange, format_iso_date, now_utc_rfc3339, today_utc};

pub use stats::{Baseline, InsufficientData, MIN_SERIES_POINTS};

pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;
pub const DEFAULT_THRESHOLD: f64 = 2.0;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Daily values for one metric and client. Called from worker threads.
pub trait DailySeriesSource: Send + Sync {
    fn fetch_daily_series(
        &self,
        client_id: &str,
        metric: &MetricDefinition,
        window: DateRange,
    ) -> anyhow::Result<DailyMetricSeries>;
}

/// Receives every event of one run in a single call.
pub trait AnomalyEventSink: Send + Sync {
    fn persist_events(&self, events: &[AnomalyEvent]) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectOptions {
    /// Metrics to scan; empty means every metric in the catalog.
    pub metric_slugs: Vec<String>,
    pub lookback_days: u32,
    pub threshold: f64,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            metric_slugs: Vec::new(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyEngineOptions {
    pub fetch_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for AnomalyEngineOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownMetric,
    InsufficientData,
    FetchFailed,
    FetchTimedOut,
    NonFiniteValue,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownMetric => "unknown_metric",
            Self::InsufficientData => "insufficient_data",
            Self::FetchFailed => "fetch_failed",
            Self::FetchTimedOut => "fetch_timed_out",
            Self::NonFiniteValue => "non_finite_value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMetric {
    pub metric: String,
    pub reason: SkipReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub client_id: String,
    pub window_start: String,
    pub window_end: String,
    pub evaluated: usize,
    /// Severity descending; ties keep processing order.
    pub events: Vec<AnomalyEvent>,
    pub skipped: Vec<SkippedMetric>,
    pub persisted: usize,
}

#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("invalid anomaly detection options: {0}")]
    InvalidOptions(String),
    #[error("failed to persist {count} anomaly events: {source}")]
    Persist {
        count: usize,
        #[source]
        source: StorageError,
    },
}

/// Batch anomaly scan over the shared catalog. One metric failing to fetch or
/// score never fails the run; only the final persist can.
pub struct AnomalyEngine {
    catalog: Arc<MetricCatalog>,
    series: Arc<dyn DailySeriesSource>,
    sink: Arc<dyn AnomalyEventSink>,
    options: AnomalyEngineOptions,
}

impl AnomalyEngine {
    #[must_use]
    pub fn new(
        catalog: Arc<MetricCatalog>,
        series: Arc<dyn DailySeriesSource>,
        sink: Arc<dyn AnomalyEventSink>,
        options: AnomalyEngineOptions,
    ) -> Self {
        Self {
            catalog,
            series,
            sink,
            options,
        }
    }

    pub fn detect(
        &self,
        client_id: &str,
        options: &DetectOptions,
    ) -> Result<AnomalyReport, AnomalyError> {
        self.detect_at(client_id, options, today_utc())
    }

    /// Scans the `lookback_days` days ending on `today` (inclusive).
    pub fn detect_at(
        &self,
        client_id: &str,
        options: &DetectOptions,
        today: Date,
    ) -> Result<AnomalyReport, AnomalyError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(AnomalyError::InvalidOptions(
                "client id must not be empty".to_string(),
            ));
        }
        if (options.lookback_days as usize) < MIN_SERIES_POINTS {
            return Err(AnomalyError::InvalidOptions(format!(
                "lookback must cover at least {MIN_SERIES_POINTS} days"
            )));
        }
        if !options.threshold.is_finite() || options.threshold < 0.0 {
            return Err(AnomalyError::InvalidOptions(
                "threshold must be a non-negative number".to_string(),
            ));
        }
        let window = DateRange::trailing(today, options.lookback_days).ok_or_else(|| {
            AnomalyError::InvalidOptions("lookback window falls outside the calendar".to_string())
        })?;

        let (targets, mut skipped) = self.resolve_targets(&options.metric_slugs);
        let detected_at_utc = now_utc_rfc3339();
        let mut events = Vec::new();

        for group in targets.chunks(self.options.max_concurrency.max(1)) {
            let pending = group
                .iter()
                .map(|metric| {
                    (
                        Arc::clone(metric),
                        self.spawn_series_fetch(client_id, metric, window),
                    )
                })
                .collect::<Vec<_>>();

            for (metric, fetch) in pending {
                let scored = fetch
                    .and_then(PendingFetch::wait)
                    .map_err(|error| fetch_skip(&metric.slug, &error))
                    .and_then(|series| {
                        score_series(client_id, series, options.threshold, &detected_at_utc)
                    });
                match scored {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(skip) => {
                        warn!(
                            metric = %skip.metric,
                            reason = skip.reason.as_str(),
                            detail = %skip.detail,
                            "skipping metric in anomaly scan"
                        );
                        skipped.push(skip);
                    }
                }
            }
        }

        events.sort_by(|left, right| right.severity.cmp(&left.severity));
        let persisted = self.persist(&events)?;

        info!(
            client_id,
            evaluated = targets.len(),
            anomalies = events.len(),
            skipped = skipped.len(),
            "anomaly scan finished"
        );

        Ok(AnomalyReport {
            client_id: client_id.to_string(),
            window_start: format_iso_date(window.start),
            window_end: format_iso_date(window.end),
            evaluated: targets.len(),
            events,
            skipped,
            persisted,
        })
    }

    fn resolve_targets(
        &self,
        slugs: &[String],
    ) -> (Vec<Arc<MetricDefinition>>, Vec<SkippedMetric>) {
        let snapshot = self.catalog.snapshot();
        if slugs.is_empty() {
            return (snapshot.metrics().cloned().collect(), Vec::new());
        }

        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();
        let mut skipped = Vec::new();
        for slug in slugs {
            let slug = slug.trim();
            if !seen.insert(slug.to_string()) {
                continue;
            }
            match snapshot.lookup(slug) {
                Ok(metric) => targets.push(metric),
                Err(error) => skipped.push(SkippedMetric {
                    metric: slug.to_string(),
                    reason: SkipReason::UnknownMetric,
                    detail: error.to_string(),
                }),
            }
        }
        (targets, skipped)
    }

    fn spawn_series_fetch(
        &self,
        client_id: &str,
        metric: &Arc<MetricDefinition>,
        window: DateRange,
    ) -> Result<PendingFetch<DailyMetricSeries>, StorageError> {
        let source = Arc::clone(&self.series);
        let client_id = client_id.to_string();
        let task_metric = Arc::clone(metric);
        spawn_fetch(
            format!("daily series {}", metric.slug),
            self.options.fetch_timeout,
            move || source.fetch_daily_series(&client_id, &task_metric, window),
        )
    }

    /// No deadline here; the reported outcome must match what the sink wrote.
    fn persist(&self, events: &[AnomalyEvent]) -> Result<usize, AnomalyError> {
        if events.is_empty() {
            return Ok(0);
        }
        self.sink
            .persist_events(events)
            .map_err(|error| AnomalyError::Persist {
                count: events.len(),
                source: StorageError::backend("anomaly persist", &error),
            })
    }
}

fn fetch_skip(metric: &str, error: &StorageError) -> SkippedMetric {
    SkippedMetric {
        metric: metric.to_string(),
        reason: if error.is_timeout() {
            SkipReason::FetchTimedOut
        } else {
            SkipReason::FetchFailed
        },
        detail: error.to_string(),
    }
}

/// Scores the latest point of `series` against the points before it.
fn score_series(
    client_id: &str,
    mut series: DailyMetricSeries,
    threshold: f64,
    detected_at_utc: &str,
) -> Result<Option<AnomalyEvent>, SkippedMetric> {
    series.points.sort_by_key(|point| point.date);
    let values = series.values();

    if values.iter().any(|value| !value.is_finite()) {
        return Err(SkippedMetric {
            metric: series.metric,
            reason: SkipReason::NonFiniteValue,
            detail: "series contains a non-finite value".to_string(),
        });
    }

    let (baseline, current) = stats::baseline(&values).map_err(|error| SkippedMetric {
        metric: series.metric.clone(),
        reason: SkipReason::InsufficientData,
        detail: error.to_string(),
    })?;

    let z_score = stats::z_score(current, &baseline);
    if z_score.abs() <= threshold {
        return Ok(None);
    }

    Ok(Some(AnomalyEvent {
        client_id: client_id.to_string(),
        metric: series.metric,
        direction: stats::direction(current, &baseline),
        z_score,
        current_value: current,
        baseline_mean: baseline.mean,
        baseline_std_dev: baseline.std_dev,
        severity: stats::classify_severity(z_score),
        detected_at_utc: detected_at_utc.to_string(),
    }))
}
