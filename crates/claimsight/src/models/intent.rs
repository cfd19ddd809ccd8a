use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Structured intent as produced by the language-model translator. Every
/// field is untrusted; nothing here is usable until it has been validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RawIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterClause>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<RawTimeRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_grain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,

    /// Explicit turn hint from the translator. Absent means "infer".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<TurnKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FilterClause {
    pub field: String,
    pub operator: String,

    /// Scalar value. `IN` / `NOT IN` take a comma separated list.
    #[serde(deserialize_with = "deserialize_scalar_text")]
    #[schemars(with = "String")]
    pub value: String,
}

impl FilterClause {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn field_key(&self) -> String {
        self.field.trim().to_ascii_lowercase()
    }
}

/// Dates as authored: `YYYY-MM-DD`, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RawTimeRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Fresh,
    Refinement,
}

impl TurnKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Refinement => "refinement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "quarter" => Some(Self::Quarter),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
}

impl FilterOperator {
    pub const ALL: [Self; 9] = [
        Self::Eq,
        Self::NotEq,
        Self::Gt,
        Self::Lt,
        Self::Gte,
        Self::Lte,
        Self::Like,
        Self::In,
        Self::NotIn,
    ];

    /// Keyword operators are matched case-insensitively and with collapsed
    /// whitespace; symbolic operators must match exactly.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|operator| operator.as_sql() == normalized)
    }

    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
        }
    }

    #[must_use]
    pub const fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Table,
    Area,
}

impl ChartType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Pie => "pie",
            Self::Table => "table",
            Self::Area => "area",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bar" => Some(Self::Bar),
            "line" => Some(Self::Line),
            "pie" => Some(Self::Pie),
            "table" => Some(Self::Table),
            "area" => Some(Self::Area),
            _ => None,
        }
    }
}

fn deserialize_scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Err(serde::de::Error::custom("filter value must not be null")),
        Value::Array(_) | Value::Object(_) => Err(serde::de::Error::custom(
            "filter value must be a scalar; use a comma separated string for IN lists",
        )),
    }
}

#[must_use]
pub fn intent_json_schema() -> Value {
    schemars::schema_for!(RawIntent).to_value()
}

#[cfg(test)]
mod tests {
    use super::{ChartType, FilterClause, FilterOperator, RawIntent, TimeGrain, intent_json_schema};

    #[test]
    fn operator_parser_accepts_only_the_closed_set() {
        assert_eq!(FilterOperator::parse("="), Some(FilterOperator::Eq));
        assert_eq!(FilterOperator::parse(" like "), Some(FilterOperator::Like));
        assert_eq!(FilterOperator::parse("not   in"), Some(FilterOperator::NotIn));
        assert_eq!(FilterOperator::parse("=="), None);
        assert_eq!(FilterOperator::parse("<>"), None);
        assert_eq!(FilterOperator::parse("; DROP TABLE claims"), None);
        assert_eq!(FilterOperator::parse("BETWEEN"), None);
    }

    #[test]
    fn grain_and_chart_parsers_are_case_insensitive() {
        assert_eq!(TimeGrain::parse("Quarter"), Some(TimeGrain::Quarter));
        assert_eq!(TimeGrain::parse("fortnight"), None);
        assert_eq!(ChartType::parse(" PIE"), Some(ChartType::Pie));
        assert_eq!(ChartType::parse("sankey"), None);
    }

    #[test]
    fn filter_values_accept_numbers_and_booleans() {
        let intent: RawIntent = serde_json::from_str(
            r#"{"metric":"claim_volume","filters":[
                {"field":"paid_amount","operator":">","value":5000},
                {"field":"status","operator":"=","value":"open"},
                {"field":"reopened","operator":"=","value":true}
            ]}"#,
        )
        .expect("intent should parse");

        assert_eq!(
            intent.filters,
            vec![
                FilterClause::new("paid_amount", ">", "5000"),
                FilterClause::new("status", "=", "open"),
                FilterClause::new("reopened", "=", "true"),
            ]
        );
    }

    #[test]
    fn filter_values_reject_arrays_and_null() {
        let array = serde_json::from_str::<RawIntent>(
            r#"{"filters":[{"field":"region","operator":"IN","value":["west","east"]}]}"#,
        );
        assert!(array.is_err());

        let null = serde_json::from_str::<RawIntent>(
            r#"{"filters":[{"field":"region","operator":"=","value":null}]}"#,
        );
        assert!(null.is_err());
    }

    #[test]
    fn intent_schema_lists_top_level_properties() {
        let schema = intent_json_schema();
        let properties = schema
            .get("properties")
            .and_then(|value| value.as_object())
            .expect("schema should expose properties");
        for key in ["metric", "dimensions", "filters", "time_range", "time_grain", "limit"] {
            assert!(properties.contains_key(key), "missing property {key}");
        }
    }
}
