use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ValidationError;
use crate::utils::time::now_utc_rfc3339;

pub const QUERY_ENVELOPE_SCHEMA_VERSION: &str = "claimsight.query-envelope.v1";
pub const INTENT_REJECTED_CODE: &str = "intent_rejected";

/// Lenient-policy record: something was clamped or defaulted instead of
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryEnvelopeNote {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The one JSON object every command prints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEnvelope {
    pub ok: bool,
    pub command: String,
    pub generated_at_utc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub meta: BTreeMap<String, Value>,
    pub notes: Vec<QueryEnvelopeNote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryEnvelopeError>,
}

impl QueryEnvelope {
    #[must_use]
    pub fn ok(command: impl Into<String>, data: Value) -> Self {
        Self::stamped(command.into(), Some(data), None)
    }

    #[must_use]
    pub fn error(
        command: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let error = QueryEnvelopeError {
            code: code.into(),
            message: message.into(),
            details: None,
        };
        Self::stamped(command.into(), None, Some(error))
    }

    /// Failure envelope for a validation rejection; details name the
    /// offending field and value.
    #[must_use]
    pub fn rejected(command: impl Into<String>, error: &ValidationError) -> Self {
        Self::error(command, INTENT_REJECTED_CODE, error.message.clone())
            .with_error_details(error.details())
    }

    fn stamped(command: String, data: Option<Value>, error: Option<QueryEnvelopeError>) -> Self {
        let meta = BTreeMap::from([(
            "schema_version".to_string(),
            json!(QUERY_ENVELOPE_SCHEMA_VERSION),
        )]);
        Self {
            ok: error.is_none(),
            command,
            generated_at_utc: now_utc_rfc3339(),
            data,
            meta,
            notes: Vec::new(),
            error,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_note(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.notes.push(QueryEnvelopeNote {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    #[must_use]
    pub fn with_error_details(mut self, details: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }

    /// Wraps a failure envelope so `main` can print it and pick the exit code.
    #[must_use]
    pub fn into_failure(self) -> anyhow::Error {
        anyhow::Error::new(QueryEnvelopeCommandFailure { envelope: self })
    }
}

#[derive(Debug, Clone)]
pub struct QueryEnvelopeCommandFailure {
    envelope: QueryEnvelope,
}

impl QueryEnvelopeCommandFailure {
    #[must_use]
    pub fn envelope(&self) -> &QueryEnvelope {
        &self.envelope
    }

    /// Exit code 2 territory: the caller's intent was refused, as opposed to
    /// a runtime fault.
    #[must_use]
    pub fn is_intent_rejection(&self) -> bool {
        self.envelope
            .error
            .as_ref()
            .is_some_and(|error| error.code == INTENT_REJECTED_CODE)
    }
}

impl Display for QueryEnvelopeCommandFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.envelope) {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => f.write_str("query envelope serialization failure"),
        }
    }
}

impl std::error::Error for QueryEnvelopeCommandFailure {}
