//! Metric definitions shipped for the claims mart. `db init` seeds these into
//! storage; the catalog itself always reads from its source.

use crate::models::{Aggregation, ChartType, ColumnBinding, MetricDefinition, ResultShape};

pub const CLAIMS_TABLE: &str = "claims";
pub const CLAIMS_TIMESTAMP_COLUMN: &str = "reported_at";

#[must_use]
pub fn claims_catalog() -> Vec<MetricDefinition> {
    vec![
        sla_breach_rate(),
        claim_volume(),
        total_paid_amount(),
        avg_cycle_time_days(),
        claims_by_status(),
        reserve_ratio_by_region(),
        adjuster_workload(),
    ]
}

fn claims_metric(
    slug: &str,
    display_name: &str,
    category: &str,
    unit: &str,
    result_shape: ResultShape,
    aggregation: Aggregation,
    default_chart: ChartType,
) -> MetricDefinition {
    MetricDefinition {
        slug: slug.to_string(),
        display_name: display_name.to_string(),
        category: category.to_string(),
        unit: unit.to_string(),
        result_shape,
        aggregation,
        source_table: CLAIMS_TABLE.to_string(),
        timestamp_column: CLAIMS_TIMESTAMP_COLUMN.to_string(),
        client_column: crate::models::metric::DEFAULT_CLIENT_COLUMN.to_string(),
        dimensions: Vec::new(),
        filters: Vec::new(),
        default_chart,
    }
}

#[must_use]
pub fn sla_breach_rate() -> MetricDefinition {
    let mut metric = claims_metric(
        "sla_breach_rate",
        "SLA Breach Rate",
        "service",
        "ratio",
        ResultShape::TimeSeries,
        Aggregation::Rate {
            flag_column: "sla_breached".to_string(),
        },
        ChartType::Line,
    );
    metric.filters = vec![ColumnBinding::new("claim_severity", "severity")];
    metric
}

#[must_use]
pub fn claim_volume() -> MetricDefinition {
    let mut metric = claims_metric(
        "claim_volume",
        "Claim Volume",
        "intake",
        "claims",
        ResultShape::TimeSeries,
        Aggregation::Count,
        ChartType::Bar,
    );
    metric.filters = vec![
        ColumnBinding::new("claim_severity", "severity"),
        ColumnBinding::new("paid_amount", "paid_amount"),
    ];
    metric
}

#[must_use]
pub fn total_paid_amount() -> MetricDefinition {
    let mut metric = claims_metric(
        "total_paid_amount",
        "Total Paid Amount",
        "financial",
        "usd",
        ResultShape::TimeSeries,
        Aggregation::Sum {
            column: "paid_amount".to_string(),
        },
        ChartType::Area,
    );
    metric.filters = vec![
        ColumnBinding::new("paid_amount", "paid_amount"),
        ColumnBinding::new("claim_severity", "severity"),
    ];
    metric
}

#[must_use]
pub fn avg_cycle_time_days() -> MetricDefinition {
    let mut metric = claims_metric(
        "avg_cycle_time_days",
        "Average Cycle Time",
        "service",
        "days",
        ResultShape::TimeSeries,
        Aggregation::Average {
            column: "cycle_time_days".to_string(),
        },
        ChartType::Line,
    );
    metric.filters = vec![
        ColumnBinding::new("cycle_time_days", "cycle_time_days"),
        ColumnBinding::new("claim_severity", "severity"),
    ];
    metric
}

#[must_use]
pub fn claims_by_status() -> MetricDefinition {
    let mut metric = claims_metric(
        "claims_by_status",
        "Claims by Status",
        "intake",
        "claims",
        ResultShape::Dimensional,
        Aggregation::Count,
        ChartType::Bar,
    );
    metric.dimensions = vec![
        ColumnBinding::new("status", "status"),
        ColumnBinding::new("region", "region"),
        ColumnBinding::new("line_of_business", "line_of_business"),
    ];
    metric.filters = vec![ColumnBinding::new("claim_severity", "severity")];
    metric
}

#[must_use]
pub fn reserve_ratio_by_region() -> MetricDefinition {
    let mut metric = claims_metric(
        "reserve_ratio_by_region",
        "Paid-to-Reserve Ratio",
        "financial",
        "ratio",
        ResultShape::Dimensional,
        Aggregation::Ratio {
            numerator: "paid_amount".to_string(),
            denominator: "reserve_amount".to_string(),
        },
        ChartType::Bar,
    );
    metric.dimensions = vec![
        ColumnBinding::new("region", "region"),
        ColumnBinding::new("line_of_business", "line_of_business"),
    ];
    metric.filters = vec![ColumnBinding::new("reserve_amount", "reserve_amount")];
    metric
}

#[must_use]
pub fn adjuster_workload() -> MetricDefinition {
    let mut metric = claims_metric(
        "adjuster_workload",
        "Adjuster Workload",
        "operations",
        "claims",
        ResultShape::Table,
        Aggregation::CountDistinct {
            column: "claim_id".to_string(),
        },
        ChartType::Table,
    );
    metric.dimensions = vec![
        ColumnBinding::new("adjuster", "adjuster_id"),
        ColumnBinding::new("region", "region"),
        ColumnBinding::new("status", "status"),
    ];
    metric.filters = vec![ColumnBinding::new("claim_severity", "severity")];
    metric
}

#[cfg(test)]
mod tests {
    use super::claims_catalog;
    use crate::catalog::CatalogSnapshot;

    #[test]
    fn builtin_catalog_loads_without_rejections() {
        let snapshot = CatalogSnapshot::from_definitions(claims_catalog());
        assert!(snapshot.rejected().is_empty(), "{:?}", snapshot.rejected());
        assert_eq!(snapshot.len(), 7);
    }
}
