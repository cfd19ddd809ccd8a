pub mod anomaly;
pub mod intent;
pub mod metric;
pub mod query;
pub mod query_envelope;

pub use anomaly::{AnomalyEvent, DailyMetricSeries, DailyPoint, Direction, Severity};
pub use intent::{
    ChartType, FilterClause, FilterOperator, RawIntent, RawTimeRange, TimeGrain, TurnKind,
    intent_json_schema,
};
pub use metric::{
    Aggregation, ColumnBinding, MetricDefinition, ResultShape, is_safe_identifier, is_valid_slug,
};
pub use query::{QueryDescriptor, QueryParam};
pub use query_envelope::{
    INTENT_REJECTED_CODE, QUERY_ENVELOPE_SCHEMA_VERSION, QueryEnvelope, QueryEnvelopeCommandFailure,
    QueryEnvelopeNote,
};
