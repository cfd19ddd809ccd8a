use serde::{Deserialize, Serialize};

use super::intent::ChartType;
use super::metric::ResultShape;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryParam {
    Text(String),
    Integer(i64),
}

/// Executable query handed to the execution layer. `template` holds `?N`
/// placeholders that line up with `params`; the only literal identifiers in it
/// came from the metric catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub metric: String,
    pub template: String,
    pub params: Vec<QueryParam>,
    pub result_shape: ResultShape,
    pub chart_type: ChartType,
    pub columns: Vec<String>,
}

impl QueryDescriptor {
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.params.len()
    }
}
