//! SQL fragments for the SQLite dialect. Every function here takes only
//! catalog identifiers that were already checked with `is_safe_identifier`.

use crate::models::{Aggregation, TimeGrain};

/// Buckets `column` (an ISO-8601 date or timestamp) to the first day of its
/// grain. Weeks start on Monday.
#[must_use]
pub fn truncate_expr(grain: TimeGrain, column: &str) -> String {
    match grain {
        TimeGrain::Day => format!("date({column})"),
        TimeGrain::Week => format!("date({column}, 'weekday 0', '-6 days')"),
        TimeGrain::Month => format!("strftime('%Y-%m-01', {column})"),
        TimeGrain::Quarter => format!(
            "printf('%s-%02d-01', strftime('%Y', {column}), \
             ((CAST(strftime('%m', {column}) AS INTEGER) - 1) / 3) * 3 + 1)"
        ),
        TimeGrain::Year => format!("strftime('%Y-01-01', {column})"),
    }
}

/// Aggregate expression for one metric. Averages, rates and ratios divide by
/// `NULLIF(.., 0)`, so an empty or all-zero group yields NULL instead of an
/// execution error.
#[must_use]
pub fn aggregation_sql(aggregation: &Aggregation) -> String {
    match aggregation {
        Aggregation::Count => "COUNT(*)".to_string(),
        Aggregation::CountDistinct { column } => format!("COUNT(DISTINCT {column})"),
        Aggregation::Sum { column } => format!("COALESCE(SUM({column}), 0)"),
        Aggregation::Average { column } => {
            format!("CAST(SUM({column}) AS REAL) / NULLIF(COUNT({column}), 0)")
        }
        Aggregation::Rate { flag_column } => format!(
            "CAST(SUM(CASE WHEN {flag_column} = 1 THEN 1 ELSE 0 END) AS REAL) / NULLIF(COUNT(*), 0)"
        ),
        Aggregation::Ratio {
            numerator,
            denominator,
        } => format!("CAST(COALESCE(SUM({numerator}), 0) AS REAL) / NULLIF(SUM({denominator}), 0)"),
    }
}

/// Hands out numbered `?N` placeholders in bind order.
#[derive(Debug, Default)]
pub(crate) struct ParamBinder<P> {
    params: Vec<P>,
}

impl<P> ParamBinder<P> {
    pub(crate) fn new() -> Self {
        Self { params: Vec::new() }
    }

    pub(crate) fn bind(&mut self, param: P) -> String {
        self.params.push(param);
        format!("?{}", self.params.len())
    }

    pub(crate) fn into_params(self) -> Vec<P> {
        self.params
    }
}
