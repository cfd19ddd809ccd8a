pub mod templates;

use tracing::{debug, error};

use crate::error::CompilationError;
use crate::models::{
    MetricDefinition, QueryDescriptor, QueryParam, ResultShape, is_safe_identifier,
};
use crate::utils::time::format_iso_date;
use crate::validate::{ResolvedDimension, ValidatedIntent};

pub use templates::{aggregation_sql, truncate_expr};
use templates::ParamBinder;

/// Everything the shape templates need to know about one metric, derived
/// from its catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPlan {
    pub slug: String,
    pub table: String,
    pub timestamp_column: String,
    pub client_column: String,
    pub aggregation_sql: String,
    pub shape: ResultShape,
}

impl MetricPlan {
    pub fn for_metric(metric: &MetricDefinition) -> Result<Self, CompilationError> {
        if let Some(identifier) = metric
            .identifiers()
            .into_iter()
            .chain(metric.dimensions.iter().map(|binding| binding.key.as_str()))
            .find(|identifier| !is_safe_identifier(identifier))
        {
            return Err(CompilationError::UnsafeIdentifier {
                metric: metric.slug.clone(),
                identifier: identifier.to_string(),
            });
        }

        Ok(Self {
            slug: metric.slug.clone(),
            table: metric.source_table.clone(),
            timestamp_column: metric.timestamp_column.clone(),
            client_column: metric.client_column.clone(),
            aggregation_sql: aggregation_sql(&metric.aggregation),
            shape: metric.result_shape,
        })
    }
}

type ShapeTemplate = fn(&MetricPlan, &ValidatedIntent) -> Result<QueryDescriptor, CompilationError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler;

impl QueryCompiler {
    pub fn compile(&self, intent: &ValidatedIntent) -> Result<QueryDescriptor, CompilationError> {
        compile(intent)
    }

    pub fn compile_totals(
        &self,
        intent: &ValidatedIntent,
    ) -> Result<QueryDescriptor, CompilationError> {
        compile_totals(intent)
    }
}

/// Compiles a validated intent into a parameterized query. Errors here mean
/// the catalog entry and the validated intent disagree; they are logged and
/// never caused by user input alone.
pub fn compile(intent: &ValidatedIntent) -> Result<QueryDescriptor, CompilationError> {
    let compiled = MetricPlan::for_metric(intent.metric()).and_then(|plan| {
        check_resolved_columns(intent)?;
        shape_template(plan.shape)(&plan, intent)
    });
    log_outcome(intent, &compiled);
    compiled
}

/// One total per time bucket regardless of the metric's shape. Dimensions on
/// the intent are ignored.
pub fn compile_totals(intent: &ValidatedIntent) -> Result<QueryDescriptor, CompilationError> {
    let compiled = MetricPlan::for_metric(intent.metric()).and_then(|plan| {
        check_resolved_columns(intent)?;
        render(&plan, intent, &[], ResultShape::TimeSeries)
    });
    log_outcome(intent, &compiled);
    compiled
}

fn shape_template(shape: ResultShape) -> ShapeTemplate {
    match shape {
        ResultShape::TimeSeries => time_series,
        ResultShape::Dimensional => dimensional,
        ResultShape::Table => table,
    }
}

fn time_series(
    plan: &MetricPlan,
    intent: &ValidatedIntent,
) -> Result<QueryDescriptor, CompilationError> {
    if !intent.dimensions().is_empty() {
        return Err(shape_mismatch(plan, intent));
    }
    render(plan, intent, &[], plan.shape)
}

fn dimensional(
    plan: &MetricPlan,
    intent: &ValidatedIntent,
) -> Result<QueryDescriptor, CompilationError> {
    if intent.dimensions().len() != 1 {
        return Err(shape_mismatch(plan, intent));
    }
    render(plan, intent, intent.dimensions(), plan.shape)
}

fn table(
    plan: &MetricPlan,
    intent: &ValidatedIntent,
) -> Result<QueryDescriptor, CompilationError> {
    if intent.dimensions().is_empty() {
        return Err(shape_mismatch(plan, intent));
    }
    render(plan, intent, intent.dimensions(), plan.shape)
}

fn shape_mismatch(plan: &MetricPlan, intent: &ValidatedIntent) -> CompilationError {
    CompilationError::ShapeMismatch {
        metric: plan.slug.clone(),
        shape: plan.shape.as_str(),
        dimensions: intent.dimensions().len(),
    }
}

/// Re-checks that every column the intent carries is one the metric declares
/// (or a plain identifier, for global filter fields).
fn check_resolved_columns(intent: &ValidatedIntent) -> Result<(), CompilationError> {
    let metric = intent.metric();
    for dimension in intent.dimensions() {
        if metric.dimension_column(&dimension.key) != Some(dimension.column.as_str()) {
            return Err(CompilationError::UndeclaredDimension {
                metric: metric.slug.clone(),
                dimension: dimension.key.clone(),
            });
        }
    }

    let unsafe_column = intent
        .dimensions()
        .iter()
        .map(|dimension| dimension.column.as_str())
        .chain(intent.filters().iter().map(|filter| filter.column.as_str()))
        .find(|column| !is_safe_identifier(column));
    match unsafe_column {
        Some(identifier) => Err(CompilationError::UnsafeIdentifier {
            metric: metric.slug.clone(),
            identifier: identifier.to_string(),
        }),
        None => Ok(()),
    }
}

fn render(
    plan: &MetricPlan,
    intent: &ValidatedIntent,
    dimensions: &[ResolvedDimension],
    shape: ResultShape,
) -> Result<QueryDescriptor, CompilationError> {
    let range = intent.time_range();
    let end_exclusive = range
        .end_exclusive()
        .ok_or_else(|| CompilationError::UnboundedRange {
            end: format_iso_date(range.end),
        })?;

    let mut binder = ParamBinder::new();
    let label = truncate_expr(intent.time_grain(), &plan.timestamp_column);

    let mut select = vec![format!("{label} AS label")];
    select.extend(
        dimensions
            .iter()
            .map(|dimension| format!("{} AS \"{}\"", dimension.column, dimension.key)),
    );
    select.push(format!("{} AS value", plan.aggregation_sql));

    let start_param = binder.bind(QueryParam::Text(format_iso_date(range.start)));
    let end_param = binder.bind(QueryParam::Text(format_iso_date(end_exclusive)));
    let mut predicates = vec![
        format!("{} >= {start_param}", plan.timestamp_column),
        format!("{} < {end_param}", plan.timestamp_column),
    ];
    if let Some(client_id) = intent.client_id() {
        let placeholder = binder.bind(QueryParam::Text(client_id.to_string()));
        predicates.push(format!("{} = {placeholder}", plan.client_column));
    }
    for filter in intent.filters() {
        let predicate = if filter.operator.takes_list() {
            let placeholders = filter
                .values
                .iter()
                .map(|value| binder.bind(QueryParam::Text(value.clone())))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} {} ({placeholders})", filter.column, filter.operator.as_sql())
        } else {
            let value = filter.values.first().cloned().unwrap_or_default();
            let placeholder = binder.bind(QueryParam::Text(value));
            format!("{} {} {placeholder}", filter.column, filter.operator.as_sql())
        };
        predicates.push(predicate);
    }

    let mut grouping = vec![label];
    grouping.extend(dimensions.iter().map(|dimension| dimension.column.clone()));
    let ordering = grouping
        .iter()
        .map(|expression| format!("{expression} ASC"))
        .collect::<Vec<_>>();

    let mut lines = vec![
        format!("SELECT {}", select.join(", ")),
        format!("FROM {}", plan.table),
        format!("WHERE {}", predicates.join(" AND ")),
        format!("GROUP BY {}", grouping.join(", ")),
        format!("ORDER BY {}", ordering.join(", ")),
    ];
    if let Some(limit) = intent.limit() {
        lines.push(format!("LIMIT {}", binder.bind(QueryParam::Integer(limit))));
    }

    let mut columns = vec!["label".to_string()];
    columns.extend(dimensions.iter().map(|dimension| dimension.key.clone()));
    columns.push("value".to_string());

    Ok(QueryDescriptor {
        metric: plan.slug.clone(),
        template: lines.join("\n"),
        params: binder.into_params(),
        result_shape: shape,
        chart_type: intent.chart_type(),
        columns,
    })
}

fn log_outcome(intent: &ValidatedIntent, compiled: &Result<QueryDescriptor, CompilationError>) {
    match compiled {
        Ok(descriptor) => debug!(
            metric = %descriptor.metric,
            shape = descriptor.result_shape.as_str(),
            params = descriptor.placeholder_count(),
            "compiled query"
        ),
        Err(compilation_error) => error!(
            metric = %intent.metric().slug,
            error = %compilation_error,
            "query compilation failed for a validated intent"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::date;

    use super::{QueryCompiler, compile, compile_totals};
    use crate::catalog::{CatalogSnapshot, builtin};
    use crate::error::CompilationError;
    use crate::models::{FilterClause, QueryParam, RawIntent, RawTimeRange, ResultShape};
    use crate::utils::time::DateRange;
    use crate::validate::{IntentValidator, ResolvedDimension, ValidatedIntent};

    fn validated(intent: RawIntent) -> ValidatedIntent {
        let snapshot = CatalogSnapshot::from_definitions(builtin::claims_catalog());
        IntentValidator::default()
            .validate_at(&intent, &snapshot, date!(2026-04-15))
            .expect("intent should validate")
    }

    fn q1_intent(metric: &str) -> RawIntent {
        RawIntent {
            metric: Some(metric.to_string()),
            time_range: Some(RawTimeRange {
                start: "2026-01-01".to_string(),
                end: "2026-03-31".to_string(),
            }),
            ..RawIntent::default()
        }
    }

    fn text(value: &str) -> QueryParam {
        QueryParam::Text(value.to_string())
    }

    #[test]
    fn dimensional_template_binds_every_value() {
        let mut raw = q1_intent("claims_by_status");
        raw.dimensions = Some(vec!["region".to_string()]);
        raw.filters = vec![FilterClause::new("claim_severity", "=", "high")];
        raw.limit = Some(50);

        let descriptor = compile(&validated(raw)).expect("query should compile");

        insta::assert_snapshot!(descriptor.template, @r#"
        SELECT strftime('%Y-%m-01', reported_at) AS label, region AS "region", COUNT(*) AS value
        FROM claims
        WHERE reported_at >= ?1 AND reported_at < ?2 AND severity = ?3
        GROUP BY strftime('%Y-%m-01', reported_at), region
        ORDER BY strftime('%Y-%m-01', reported_at) ASC, region ASC
        LIMIT ?4
        "#);
        assert_eq!(
            descriptor.params,
            vec![
                text("2026-01-01"),
                text("2026-04-01"),
                text("high"),
                QueryParam::Integer(50),
            ]
        );
        assert_eq!(descriptor.columns, vec!["label", "region", "value"]);
        assert_eq!(descriptor.result_shape, ResultShape::Dimensional);
    }

    #[test]
    fn hostile_filter_values_never_reach_the_template() {
        let hostile = "west'); DROP TABLE claims; --";
        let mut raw = q1_intent("sla_breach_rate");
        raw.filters = vec![
            FilterClause::new("region", "=", hostile),
            FilterClause::new("claim_severity", "LIKE", "%crit%"),
        ];

        let descriptor = compile(&validated(raw)).expect("query should compile");
        assert!(!descriptor.template.contains("DROP"));
        assert!(!descriptor.template.contains("crit"));
        assert!(descriptor.params.contains(&text(hostile)));
        assert_eq!(descriptor.template.matches('?').count(), descriptor.placeholder_count());
    }

    #[test]
    fn in_lists_expand_to_one_placeholder_per_value() {
        let mut raw = q1_intent("claim_volume");
        raw.filters = vec![FilterClause::new("region", "not in", "west, east,north")];

        let descriptor = compile(&validated(raw)).expect("query should compile");
        assert!(descriptor.template.contains("region NOT IN (?3, ?4, ?5)"));
        assert_eq!(descriptor.placeholder_count(), 5);
    }

    #[test]
    fn table_shape_groups_by_every_dimension_in_order() {
        let descriptor = compile(&validated(q1_intent("adjuster_workload")))
            .expect("query should compile");
        assert!(descriptor.template.contains(
            "GROUP BY strftime('%Y-%m-01', reported_at), adjuster_id, region, status"
        ));
        assert!(descriptor.template.contains("COUNT(DISTINCT claim_id) AS value"));
        assert_eq!(
            descriptor.columns,
            vec!["label", "adjuster", "region", "status", "value"]
        );
    }

    #[test]
    fn compiling_twice_is_deterministic() {
        let mut raw = q1_intent("reserve_ratio_by_region");
        raw.time_grain = Some("quarter".to_string());
        raw.filters = vec![FilterClause::new("status", "IN", "open,reopened")];
        let intent = validated(raw);

        let compiler = QueryCompiler;
        let first = compiler.compile(&intent).expect("first compile");
        let second = compiler.compile(&intent).expect("second compile");
        assert_eq!(first, second);
        assert!(first.template.contains("NULLIF(SUM(reserve_amount), 0)"));
    }

    #[test]
    fn client_scope_is_bound_after_the_time_range() {
        let intent = validated(q1_intent("claim_volume")).scoped_to_client("acme");
        let descriptor = compile(&intent).expect("query should compile");
        assert!(descriptor.template.contains("AND client_id = ?3"));
        assert_eq!(descriptor.params[2], text("acme"));
        assert!(!descriptor.template.contains("acme"));
    }

    #[test]
    fn totals_drop_dimensions_and_use_day_buckets() {
        let metric = Arc::new(builtin::claims_by_status());
        let window = DateRange {
            start: date!(2026-03-01),
            end: date!(2026-03-30),
        };
        let intent = ValidatedIntent::daily_totals(metric, window).scoped_to_client("acme");
        let descriptor = compile_totals(&intent).expect("totals should compile");

        assert!(descriptor.template.starts_with("SELECT date(reported_at) AS label, COUNT(*)"));
        assert_eq!(descriptor.result_shape, ResultShape::TimeSeries);
        assert_eq!(descriptor.columns, vec!["label", "value"]);
    }

    #[test]
    fn inconsistent_intents_are_compilation_errors() {
        let mut series = validated(q1_intent("sla_breach_rate"));
        series.dimensions = vec![ResolvedDimension {
            key: "region".to_string(),
            column: "region".to_string(),
        }];
        assert!(matches!(
            compile(&series),
            Err(CompilationError::UndeclaredDimension { .. })
        ));

        let mut dimensional = validated(q1_intent("claims_by_status"));
        dimensional.dimensions.clear();
        assert!(matches!(
            compile(&dimensional),
            Err(CompilationError::ShapeMismatch { dimensions: 0, .. })
        ));

        let mut tampered = validated(q1_intent("claim_volume"));
        let mut metric = builtin::claim_volume();
        metric.source_table = "claims; DROP TABLE claims".to_string();
        tampered.metric = Arc::new(metric);
        assert!(matches!(
            compile(&tampered),
            Err(CompilationError::UnsafeIdentifier { .. })
        ));
    }
}
