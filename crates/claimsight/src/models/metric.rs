use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::intent::ChartType;

pub const DEFAULT_CLIENT_COLUMN: &str = "client_id";

/// Output column names the compiler reserves for itself.
pub const RESERVED_OUTPUT_COLUMNS: &[&str] = &["label", "value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    TimeSeries,
    Dimensional,
    Table,
}

impl ResultShape {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeSeries => "time_series",
            Self::Dimensional => "dimensional",
            Self::Table => "table",
        }
    }
}

/// Aggregations are a closed set authored here; catalog entries only pick a
/// kind and name columns, they never carry SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    CountDistinct { column: String },
    Sum { column: String },
    Average { column: String },
    Rate { flag_column: String },
    Ratio { numerator: String, denominator: String },
}

impl Aggregation {
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Count => Vec::new(),
            Self::CountDistinct { column } | Self::Sum { column } | Self::Average { column } => {
                vec![column.as_str()]
            }
            Self::Rate { flag_column } => vec![flag_column.as_str()],
            Self::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_str(), denominator.as_str()],
        }
    }

    #[must_use]
    pub const fn has_denominator(&self) -> bool {
        matches!(
            self,
            Self::Average { .. } | Self::Rate { .. } | Self::Ratio { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBinding {
    pub key: String,
    pub column: String,
}

impl ColumnBinding {
    #[must_use]
    pub fn new(key: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub slug: String,
    pub display_name: String,
    pub category: String,
    pub unit: String,
    pub result_shape: ResultShape,
    pub aggregation: Aggregation,
    pub source_table: String,
    pub timestamp_column: String,

    #[serde(default = "default_client_column")]
    pub client_column: String,

    /// Allowed breakdowns in declaration order; the first one is the default
    /// for dimensional metrics.
    #[serde(default)]
    pub dimensions: Vec<ColumnBinding>,

    /// Filterable fields specific to this metric, on top of its dimensions and
    /// the global allow-list.
    #[serde(default)]
    pub filters: Vec<ColumnBinding>,

    pub default_chart: ChartType,
}

fn default_client_column() -> String {
    DEFAULT_CLIENT_COLUMN.to_string()
}

impl MetricDefinition {
    #[must_use]
    pub fn dimension_column(&self, key: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|binding| binding.key == key)
            .map(|binding| binding.column.as_str())
    }

    #[must_use]
    pub fn filter_column(&self, key: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|binding| binding.key == key)
            .map(|binding| binding.column.as_str())
    }

    #[must_use]
    pub fn allowed_dimension_keys(&self) -> BTreeSet<String> {
        self.dimensions
            .iter()
            .map(|binding| binding.key.clone())
            .collect()
    }

    /// Every physical identifier the compiler may print for this metric.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut identifiers = vec![
            self.source_table.as_str(),
            self.timestamp_column.as_str(),
            self.client_column.as_str(),
        ];
        identifiers.extend(self.aggregation.columns());
        identifiers.extend(self.dimensions.iter().map(|binding| binding.column.as_str()));
        identifiers.extend(self.filters.iter().map(|binding| binding.column.as_str()));
        identifiers
    }
}

#[must_use]
pub fn is_valid_slug(candidate: &str) -> bool {
    slug_regex().is_match(candidate)
}

/// Plain SQL identifiers only: no quoting, no dots, no whitespace.
#[must_use]
pub fn is_safe_identifier(candidate: &str) -> bool {
    identifier_regex().is_match(candidate)
}

fn slug_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("slug regex should compile"))
}

fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier regex should compile")
    })
}
