use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Date;
use tracing::debug;

use crate::catalog::CatalogSnapshot;
use crate::error::{ValidationError, ValidationReason};
use crate::models::{
    ChartType, FilterClause, FilterOperator, MetricDefinition, RawIntent, ResultShape, TimeGrain,
};
use crate::utils::time::{DateRange, format_iso_date, parse_iso_date, today_utc};

pub const DEFAULT_MAX_SPAN_DAYS: u32 = 730;
pub const DEFAULT_MAX_LIMIT: i64 = 10_000;
pub const DEFAULT_WINDOW_DAYS: u32 = 90;
pub const DEFAULT_TIME_GRAIN: TimeGrain = TimeGrain::Month;
pub const MAX_FILTER_VALUE_CHARS: usize = 256;

pub const NOTE_GRAIN_FALLBACK: &str = "grain_fallback";
pub const NOTE_LIMIT_CLAMPED: &str = "limit_clamped";
pub const NOTE_CHART_FALLBACK: &str = "chart_fallback";
pub const NOTE_DEFAULT_WINDOW: &str = "default_window";
pub const NOTE_DEFAULT_DIMENSIONS: &str = "default_dimensions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub max_span_days: u32,
    pub max_limit: i64,
    pub default_window_days: u32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_span_days: DEFAULT_MAX_SPAN_DAYS,
            max_limit: DEFAULT_MAX_LIMIT,
            default_window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyNote {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDimension {
    pub key: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFilter {
    pub field: String,
    pub column: String,
    pub operator: FilterOperator,
    pub values: Vec<String>,
}

/// An intent that passed every allow-list check. Only the validator (and
/// trusted in-crate builders) can construct one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedIntent {
    pub(crate) metric: Arc<MetricDefinition>,
    pub(crate) dimensions: Vec<ResolvedDimension>,
    pub(crate) filters: Vec<ResolvedFilter>,
    pub(crate) time_range: DateRange,
    pub(crate) time_grain: TimeGrain,
    pub(crate) limit: Option<i64>,
    pub(crate) chart_type: ChartType,
    pub(crate) client_id: Option<String>,
    pub(crate) notes: Vec<PolicyNote>,
}

impl ValidatedIntent {
    /// Day-grain totals for one metric over `window`, with breakdowns dropped.
    /// Used by the anomaly series fetch; nothing in it comes from an intent.
    #[must_use]
    pub fn daily_totals(metric: Arc<MetricDefinition>, window: DateRange) -> Self {
        let chart_type = metric.default_chart;
        Self {
            metric,
            dimensions: Vec::new(),
            filters: Vec::new(),
            time_range: window,
            time_grain: TimeGrain::Day,
            limit: None,
            chart_type,
            client_id: None,
            notes: Vec::new(),
        }
    }

    /// Restricts the query to one client; the id is bound, never printed.
    #[must_use]
    pub fn scoped_to_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn metric(&self) -> &MetricDefinition {
        &self.metric
    }

    #[must_use]
    pub fn dimensions(&self) -> &[ResolvedDimension] {
        &self.dimensions
    }

    #[must_use]
    pub fn filters(&self) -> &[ResolvedFilter] {
        &self.filters
    }

    #[must_use]
    pub const fn time_range(&self) -> DateRange {
        self.time_range
    }

    #[must_use]
    pub const fn time_grain(&self) -> TimeGrain {
        self.time_grain
    }

    #[must_use]
    pub const fn limit(&self) -> Option<i64> {
        self.limit
    }

    #[must_use]
    pub const fn chart_type(&self) -> ChartType {
        self.chart_type
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn notes(&self) -> &[PolicyNote] {
        &self.notes
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntentValidator {
    policy: ValidationPolicy,
}

impl IntentValidator {
    #[must_use]
    pub const fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    pub fn validate(
        &self,
        intent: &RawIntent,
        catalog: &CatalogSnapshot,
    ) -> Result<ValidatedIntent, ValidationError> {
        self.validate_at(intent, catalog, today_utc())
    }

    /// Same as [`IntentValidator::validate`] with an explicit "today", which
    /// only matters when the intent omits its time range.
    pub fn validate_at(
        &self,
        intent: &RawIntent,
        catalog: &CatalogSnapshot,
        today: Date,
    ) -> Result<ValidatedIntent, ValidationError> {
        let mut notes = Vec::new();

        let metric = resolve_metric(intent, catalog)?;
        let dimensions = resolve_dimensions(intent, &metric, &mut notes)?;
        let filters = resolve_filters(&intent.filters, &metric, catalog)?;
        let time_range = self.resolve_time_range(intent, today, &mut notes)?;
        let time_grain = resolve_grain(intent, &mut notes);
        let limit = self.clamp_limit(intent.limit, &mut notes);
        let chart_type = resolve_chart(intent, &metric, &mut notes);

        debug!(
            metric = %metric.slug,
            dimensions = dimensions.len(),
            filters = filters.len(),
            grain = time_grain.as_str(),
            notes = notes.len(),
            "intent validated"
        );

        Ok(ValidatedIntent {
            metric,
            dimensions,
            filters,
            time_range,
            time_grain,
            limit,
            chart_type,
            client_id: None,
            notes,
        })
    }

    fn resolve_time_range(
        &self,
        intent: &RawIntent,
        today: Date,
        notes: &mut Vec<PolicyNote>,
    ) -> Result<DateRange, ValidationError> {
        let Some(raw) = &intent.time_range else {
            let range = DateRange::trailing(today, self.policy.default_window_days).ok_or_else(
                || {
                    ValidationError::new(
                        ValidationReason::InvalidDate,
                        "time_range",
                        None,
                        "default time window falls outside the supported calendar",
                    )
                },
            )?;
            notes.push(PolicyNote {
                code: NOTE_DEFAULT_WINDOW,
                message: format!(
                    "no time range given; using {} through {}",
                    format_iso_date(range.start),
                    format_iso_date(range.end)
                ),
            });
            return Ok(range);
        };

        let start = parse_date_field("time_range.start", &raw.start)?;
        let end = parse_date_field("time_range.end", &raw.end)?;
        if start > end {
            return Err(ValidationError::new(
                ValidationReason::InvertedTimeRange,
                "time_range",
                Some(format!("{}..{}", raw.start.trim(), raw.end.trim()).as_str()),
                format!(
                    "time range starts ({}) after it ends ({})",
                    raw.start.trim(),
                    raw.end.trim()
                ),
            ));
        }

        let range = DateRange { start, end };
        if range.end_exclusive().is_none() {
            return Err(ValidationError::new(
                ValidationReason::InvalidDate,
                "time_range.end",
                Some(raw.end.trim()),
                "time range end is the last supported calendar day",
            ));
        }
        if range.span_days() > i64::from(self.policy.max_span_days) {
            return Err(ValidationError::new(
                ValidationReason::TimeRangeTooWide,
                "time_range",
                Some(range.span_days().to_string().as_str()),
                format!(
                    "time range covers {} days; at most {} are allowed",
                    range.span_days(),
                    self.policy.max_span_days
                ),
            ));
        }
        Ok(range)
    }

    fn clamp_limit(&self, requested: Option<i64>, notes: &mut Vec<PolicyNote>) -> Option<i64> {
        let requested = requested?;
        let max_limit = self.policy.max_limit.max(1);
        let clamped = requested.clamp(1, max_limit);
        if clamped != requested {
            notes.push(PolicyNote {
                code: NOTE_LIMIT_CLAMPED,
                message: format!("limit {requested} clamped to {clamped}"),
            });
        }
        Some(clamped)
    }
}

fn resolve_metric(
    intent: &RawIntent,
    catalog: &CatalogSnapshot,
) -> Result<Arc<MetricDefinition>, ValidationError> {
    let Some(raw) = intent.metric.as_deref().map(str::trim) else {
        return Err(ValidationError::new(
            ValidationReason::MissingMetric,
            "metric",
            None,
            "no metric given and no earlier turn to continue from",
        ));
    };
    if raw.is_empty() {
        return Err(ValidationError::new(
            ValidationReason::MissingMetric,
            "metric",
            Some(raw),
            "metric must not be empty",
        ));
    }

    catalog.lookup(raw).map_err(|_| {
        ValidationError::new(
            ValidationReason::UnknownMetric,
            "metric",
            Some(raw),
            format!("unknown metric `{raw}`"),
        )
    })
}

fn resolve_dimensions(
    intent: &RawIntent,
    metric: &MetricDefinition,
    notes: &mut Vec<PolicyNote>,
) -> Result<Vec<ResolvedDimension>, ValidationError> {
    let requested = intent.dimensions.clone().unwrap_or_default();
    let mut seen = BTreeSet::new();
    let mut resolved = Vec::with_capacity(requested.len());

    for (index, raw_key) in requested.iter().enumerate() {
        let key = raw_key.trim().to_ascii_lowercase();
        let field = format!("dimensions[{index}]");
        let Some(column) = metric.dimension_column(&key) else {
            return Err(ValidationError::new(
                ValidationReason::DimensionNotAllowed,
                field,
                Some(raw_key.as_str()),
                format!(
                    "metric `{}` cannot be broken down by `{}`",
                    metric.slug,
                    raw_key.trim()
                ),
            ));
        };
        if !seen.insert(key.clone()) {
            return Err(ValidationError::new(
                ValidationReason::DuplicateDimension,
                field,
                Some(raw_key.as_str()),
                format!("dimension `{key}` is requested more than once"),
            ));
        }
        resolved.push(ResolvedDimension {
            key,
            column: column.to_string(),
        });
    }

    match metric.result_shape {
        ResultShape::TimeSeries => Ok(resolved),
        ResultShape::Dimensional if resolved.len() > 1 => Err(ValidationError::new(
            ValidationReason::DimensionCountMismatch,
            "dimensions",
            Some(requested.join(",").as_str()),
            format!(
                "metric `{}` is broken down by exactly one dimension; {} were requested",
                metric.slug,
                resolved.len()
            ),
        )),
        ResultShape::Dimensional | ResultShape::Table if resolved.is_empty() => {
            let defaults = match metric.result_shape {
                ResultShape::Dimensional => metric.dimensions.iter().take(1).collect::<Vec<_>>(),
                _ => metric.dimensions.iter().collect::<Vec<_>>(),
            };
            let resolved = defaults
                .into_iter()
                .map(|binding| ResolvedDimension {
                    key: binding.key.clone(),
                    column: binding.column.clone(),
                })
                .collect::<Vec<_>>();
            notes.push(PolicyNote {
                code: NOTE_DEFAULT_DIMENSIONS,
                message: format!(
                    "no dimension given; using {}",
                    resolved
                        .iter()
                        .map(|dimension| dimension.key.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
            Ok(resolved)
        }
        ResultShape::Dimensional | ResultShape::Table => Ok(resolved),
    }
}

/// Every field is resolved before any operator is looked at, so an unknown
/// field is reported even when an earlier clause also has a bad operator.
fn resolve_filters(
    clauses: &[FilterClause],
    metric: &MetricDefinition,
    catalog: &CatalogSnapshot,
) -> Result<Vec<ResolvedFilter>, ValidationError> {
    let columns = clauses
        .iter()
        .enumerate()
        .map(|(index, clause)| resolve_filter_column(index, clause, metric, catalog))
        .collect::<Result<Vec<_>, _>>()?;
    let operators = clauses
        .iter()
        .enumerate()
        .map(|(index, clause)| resolve_filter_operator(index, clause))
        .collect::<Result<Vec<_>, _>>()?;

    clauses
        .iter()
        .zip(columns.into_iter().zip(operators))
        .enumerate()
        .map(|(index, (clause, (column, operator)))| {
            resolve_filter_values(index, clause, column, operator)
        })
        .collect()
}

fn resolve_filter_column(
    index: usize,
    clause: &FilterClause,
    metric: &MetricDefinition,
    catalog: &CatalogSnapshot,
) -> Result<String, ValidationError> {
    let field = clause.field_key();
    metric
        .filter_column(&field)
        .or_else(|| metric.dimension_column(&field))
        .or_else(|| catalog.global_filter_column(&field))
        .map(ToString::to_string)
        .ok_or_else(|| {
            ValidationError::new(
                ValidationReason::UnknownFilterField,
                format!("filters[{index}].field"),
                Some(clause.field.as_str()),
                format!(
                    "`{}` is not a filterable field for metric `{}`",
                    clause.field.trim(),
                    metric.slug
                ),
            )
        })
}

fn resolve_filter_operator(
    index: usize,
    clause: &FilterClause,
) -> Result<FilterOperator, ValidationError> {
    FilterOperator::parse(&clause.operator).ok_or_else(|| {
        ValidationError::new(
            ValidationReason::InvalidFilterOperator,
            format!("filters[{index}].operator"),
            Some(clause.operator.as_str()),
            format!(
                "operator `{}` is not one of =, !=, >, <, >=, <=, LIKE, IN, NOT IN",
                clause.operator
            ),
        )
    })
}

fn resolve_filter_values(
    index: usize,
    clause: &FilterClause,
    column: String,
    operator: FilterOperator,
) -> Result<ResolvedFilter, ValidationError> {
    let values = if operator.takes_list() {
        clause
            .value
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    } else {
        vec![clause.value.clone()]
    };

    let value_field = format!("filters[{index}].value");
    if values.is_empty() {
        return Err(ValidationError::new(
            ValidationReason::InvalidFilterValue,
            value_field,
            Some(clause.value.as_str()),
            format!("{} needs at least one value", operator.as_sql()),
        ));
    }
    if let Some(oversized) = values
        .iter()
        .find(|value| value.chars().count() > MAX_FILTER_VALUE_CHARS)
    {
        return Err(ValidationError::new(
            ValidationReason::InvalidFilterValue,
            value_field,
            Some(oversized.chars().take(32).collect::<String>().as_str()),
            format!("filter values are limited to {MAX_FILTER_VALUE_CHARS} characters"),
        ));
    }

    Ok(ResolvedFilter {
        field: clause.field_key(),
        column,
        operator,
        values,
    })
}

fn parse_date_field(field: &str, raw: &str) -> Result<Date, ValidationError> {
    parse_iso_date(raw).map_err(|_| {
        ValidationError::new(
            ValidationReason::InvalidDate,
            field,
            Some(raw),
            format!("`{}` is not a calendar date (YYYY-MM-DD)", raw.trim()),
        )
    })
}

/// Unrecognized grains fall back to `day` instead of failing the request.
fn resolve_grain(intent: &RawIntent, notes: &mut Vec<PolicyNote>) -> TimeGrain {
    let Some(raw) = intent.time_grain.as_deref() else {
        return DEFAULT_TIME_GRAIN;
    };
    TimeGrain::parse(raw).unwrap_or_else(|| {
        notes.push(PolicyNote {
            code: NOTE_GRAIN_FALLBACK,
            message: format!("unrecognized time grain `{raw}`; using day"),
        });
        TimeGrain::Day
    })
}

fn resolve_chart(
    intent: &RawIntent,
    metric: &MetricDefinition,
    notes: &mut Vec<PolicyNote>,
) -> ChartType {
    let Some(raw) = intent.chart_type.as_deref() else {
        return metric.default_chart;
    };
    ChartType::parse(raw).unwrap_or_else(|| {
        notes.push(PolicyNote {
            code: NOTE_CHART_FALLBACK,
            message: format!(
                "unrecognized chart type `{raw}`; using {}",
                metric.default_chart.as_str()
            ),
        });
        metric.default_chart
    })
}
