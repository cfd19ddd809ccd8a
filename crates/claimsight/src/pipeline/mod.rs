use std::sync::Arc;

use serde::Serialize;
use time::Date;

use crate::catalog::MetricCatalog;
use crate::compile::compile;
use crate::context::{ContextManager, ResolvedTurn};
use crate::error::{PipelineError, StorageError};
use crate::models::{QueryDescriptor, RawIntent, TurnKind};
use crate::utils::time::today_utc;
use crate::validate::{IntentValidator, PolicyNote, ValidatedIntent};

/// One conversational turn as handed over by the translator.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub intent: &'a RawIntent,
    /// Conversation thread; `None` treats the turn as standalone.
    pub thread_id: Option<&'a str>,
    /// Tenant scope bound into the query, when the caller has one.
    pub client_id: Option<&'a str>,
}

impl<'a> TurnRequest<'a> {
    #[must_use]
    pub const fn standalone(intent: &'a RawIntent) -> Self {
        Self {
            intent,
            thread_id: None,
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedQuery {
    pub turn: TurnKind,
    pub turn_number: u32,
    pub resolved_intent: RawIntent,
    pub descriptor: QueryDescriptor,
    pub notes: Vec<PolicyNote>,
}

/// Raw intent to executable descriptor: context merge, validation, compile.
/// Never executes anything itself.
pub struct QueryPipeline {
    catalog: Arc<MetricCatalog>,
    validator: IntentValidator,
    context: ContextManager,
}

impl QueryPipeline {
    #[must_use]
    pub fn new(
        catalog: Arc<MetricCatalog>,
        validator: IntentValidator,
        context: ContextManager,
    ) -> Self {
        Self {
            catalog,
            validator,
            context,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn prepare(&self, request: TurnRequest<'_>) -> Result<PreparedQuery, PipelineError> {
        self.prepare_at(request, today_utc())
    }

    /// Thread context is only written once the turn has validated and
    /// compiled, so a rejected turn leaves the previous context in place.
    pub fn prepare_at(
        &self,
        request: TurnRequest<'_>,
        today: Date,
    ) -> Result<PreparedQuery, PipelineError> {
        let resolved = match request.thread_id {
            Some(thread_id) => self
                .context
                .resolve(thread_id, request.intent)
                .map_err(|error| StorageError::backend("context load", &error))?,
            None => crate::context::merge_turn(request.intent, None),
        };

        let snapshot = self.catalog.snapshot();
        let mut validated = self
            .validator
            .validate_at(&resolved.intent, &snapshot, today)?;
        if let Some(client_id) = request.client_id {
            validated = validated.scoped_to_client(client_id);
        }
        let descriptor = compile(&validated)?;

        if let Some(thread_id) = request.thread_id {
            self.context
                .record(thread_id, &resolved)
                .map_err(|error| StorageError::backend("context save", &error))?;
        }

        Ok(prepared(resolved, &validated, descriptor))
    }
}

fn prepared(
    resolved: ResolvedTurn,
    validated: &ValidatedIntent,
    descriptor: QueryDescriptor,
) -> PreparedQuery {
    PreparedQuery {
        turn: resolved.kind,
        turn_number: resolved.turn_number,
        resolved_intent: resolved.intent,
        descriptor,
        notes: validated.notes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::date;

    use super::{QueryPipeline, TurnRequest};
    use crate::catalog::{MetricCatalog, builtin};
    use crate::context::ContextManager;
    use crate::error::PipelineError;
    use crate::models::{FilterClause, QueryParam, RawIntent, TurnKind};
    use crate::validate::IntentValidator;

    fn pipeline() -> QueryPipeline {
        QueryPipeline::new(
            Arc::new(MetricCatalog::from_definitions(builtin::claims_catalog())),
            IntentValidator::default(),
            ContextManager::in_memory(),
        )
    }

    fn turn<'a>(intent: &'a RawIntent, thread: &'a str) -> TurnRequest<'a> {
        TurnRequest {
            intent,
            thread_id: Some(thread),
            client_id: Some("acme"),
        }
    }

    #[test]
    fn refinement_turn_compiles_with_inherited_metric() {
        let pipeline = pipeline();
        let first = RawIntent {
            metric: Some("sla_breach_rate".to_string()),
            ..RawIntent::default()
        };
        pipeline
            .prepare_at(turn(&first, "t-1"), date!(2026-04-15))
            .expect("first turn should prepare");

        let second = RawIntent {
            filters: vec![FilterClause::new("adjuster_id", "=", "123")],
            ..RawIntent::default()
        };
        let prepared = pipeline
            .prepare_at(turn(&second, "t-1"), date!(2026-04-15))
            .expect("refinement should prepare");

        assert_eq!(prepared.turn, TurnKind::Refinement);
        assert_eq!(prepared.descriptor.metric, "sla_breach_rate");
        assert!(prepared.descriptor.template.contains("adjuster_id = ?4"));
        assert_eq!(
            prepared.descriptor.params[3],
            QueryParam::Text("123".to_string())
        );
        assert_eq!(prepared.descriptor.params[2], QueryParam::Text("acme".to_string()));
    }

    #[test]
    fn rejected_turn_does_not_overwrite_context() {
        let pipeline = pipeline();
        let first = RawIntent {
            metric: Some("claim_volume".to_string()),
            ..RawIntent::default()
        };
        pipeline
            .prepare_at(turn(&first, "t-2"), date!(2026-04-15))
            .expect("first turn should prepare");

        let bad = RawIntent {
            metric: Some("claims_per_moon".to_string()),
            ..RawIntent::default()
        };
        let error = pipeline
            .prepare_at(turn(&bad, "t-2"), date!(2026-04-15))
            .expect_err("unknown metric should be rejected");
        assert!(matches!(error, PipelineError::Validation(_)));

        let saved = pipeline
            .context()
            .history("t-2")
            .expect("history should load")
            .expect("thread should exist");
        assert_eq!(saved.intent.metric.as_deref(), Some("claim_volume"));
        assert_eq!(saved.turn_count, 1);
    }

    #[test]
    fn standalone_turn_skips_context() {
        let pipeline = pipeline();
        let intent = RawIntent {
            metric: Some("claims_by_status".to_string()),
            ..RawIntent::default()
        };
        let prepared = pipeline
            .prepare_at(TurnRequest::standalone(&intent), date!(2026-04-15))
            .expect("standalone turn should prepare");
        assert_eq!(prepared.turn, TurnKind::Fresh);
        assert_eq!(prepared.descriptor.columns, vec!["label", "status", "value"]);
        assert!(!prepared.notes.is_empty());
    }
}
