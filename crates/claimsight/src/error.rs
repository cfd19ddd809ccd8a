use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    MissingMetric,
    UnknownMetric,
    DimensionNotAllowed,
    DuplicateDimension,
    DimensionCountMismatch,
    UnknownFilterField,
    InvalidFilterOperator,
    InvalidFilterValue,
    InvalidDate,
    InvertedTimeRange,
    TimeRangeTooWide,
}

impl ValidationReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingMetric => "missing_metric",
            Self::UnknownMetric => "unknown_metric",
            Self::DimensionNotAllowed => "dimension_not_allowed",
            Self::DuplicateDimension => "duplicate_dimension",
            Self::DimensionCountMismatch => "dimension_count_mismatch",
            Self::UnknownFilterField => "unknown_filter_field",
            Self::InvalidFilterOperator => "invalid_filter_operator",
            Self::InvalidFilterValue => "invalid_filter_value",
            Self::InvalidDate => "invalid_date",
            Self::InvertedTimeRange => "inverted_time_range",
            Self::TimeRangeTooWide => "time_range_too_wide",
        }
    }
}

/// User-facing rejection of an intent. `field` names the intent path that
/// failed (`metric`, `dimensions[1]`, `filters[0].operator`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub reason: ValidationReason,
    pub field: String,
    pub value: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub(crate) fn new(
        reason: ValidationReason,
        field: impl Into<String>,
        value: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            reason,
            field: field.into(),
            value: value.map(ToString::to_string),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        json!({
            "reason": self.reason.as_str(),
            "field": self.field,
            "value": self.value,
        })
    }
}

/// Internal invariant violations found while compiling an already validated
/// intent. These indicate a catalog or compiler defect, never bad user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("metric `{metric}` has shape `{shape}` but resolved {dimensions} dimension(s)")]
    ShapeMismatch {
        metric: String,
        shape: &'static str,
        dimensions: usize,
    },
    #[error("metric `{metric}` does not declare dimension `{dimension}`")]
    UndeclaredDimension { metric: String, dimension: String },
    #[error("metric `{metric}` references unsafe identifier `{identifier}`")]
    UnsafeIdentifier { metric: String, identifier: String },
    #[error("time range end `{end}` has no following day")]
    UnboundedRange { end: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },
    #[error("{operation} failed: {cause}")]
    Backend { operation: String, cause: String },
    #[error("{operation} worker exited without a result")]
    WorkerLost { operation: String },
}

impl StorageError {
    pub fn backend(operation: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::Backend {
            operation: operation.into(),
            cause: format!("{error:#}"),
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("metric `{0}` is not in the catalog")]
    NotFound(String),
    #[error("metric `{metric}` has no dimension `{dimension}`")]
    DimensionNotFound { metric: String, dimension: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Compilation(#[from] CompilationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
