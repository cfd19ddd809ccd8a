use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{RawIntent, TurnKind};
use crate::utils::time::now_utc_rfc3339;

/// Most recent resolved intent for one conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub thread_id: String,
    pub intent: RawIntent,
    pub turn_count: u32,
    pub updated_at_utc: String,
}

/// Per-thread context storage. One record per thread; `save` overwrites.
///
/// Concurrent turns on the same thread are last-write-wins. Callers are
/// expected to serialize turns per thread.
pub trait ContextStore: Send + Sync {
    fn load(&self, thread_id: &str) -> Result<Option<ConversationContext>>;
    fn save(&self, context: &ConversationContext) -> Result<()>;
    fn clear(&self, thread_id: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    threads: Mutex<HashMap<String, ConversationContext>>,
}

impl InMemoryContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContextStore for InMemoryContextStore {
    fn load(&self, thread_id: &str) -> Result<Option<ConversationContext>> {
        let threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(threads.get(thread_id).cloned())
    }

    fn save(&self, context: &ConversationContext) -> Result<()> {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        threads.insert(context.thread_id.clone(), context.clone());
        Ok(())
    }

    fn clear(&self, thread_id: &str) -> Result<bool> {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(threads.remove(thread_id).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTurn {
    pub kind: TurnKind,
    pub intent: RawIntent,
    pub turn_number: u32,
}

/// Decides whether `raw` continues `history` or starts a new topic.
///
/// 1. No history: fresh.
/// 2. An explicit `turn` hint from the translator wins.
/// 3. Metric omitted: refinement of the previous metric.
/// 4. Same metric as before: refinement.
/// 5. Different metric: fresh.
#[must_use]
pub fn classify_turn(raw: &RawIntent, history: Option<&RawIntent>) -> TurnKind {
    let Some(history) = history else {
        return TurnKind::Fresh;
    };
    if let Some(kind) = raw.turn {
        return kind;
    }
    match raw.metric.as_deref().map(normalize_slug) {
        None => TurnKind::Refinement,
        Some(metric)
            if history.metric.as_deref().map(normalize_slug).as_deref()
                == Some(metric.as_str()) =>
        {
            TurnKind::Refinement
        }
        Some(_) => TurnKind::Fresh,
    }
}

/// Pure merge step: applies `raw` on top of the thread's previous context.
#[must_use]
pub fn merge_turn(raw: &RawIntent, history: Option<&ConversationContext>) -> ResolvedTurn {
    let previous = history.map(|context| &context.intent);
    let kind = classify_turn(raw, previous);
    let turn_number = history.map_or(0, |context| context.turn_count).saturating_add(1);

    let intent = match (kind, previous) {
        (TurnKind::Refinement, Some(previous)) => refine(raw, previous),
        _ => RawIntent {
            turn: None,
            ..raw.clone()
        },
    };

    ResolvedTurn {
        kind,
        intent,
        turn_number,
    }
}

fn refine(raw: &RawIntent, previous: &RawIntent) -> RawIntent {
    let overridden = raw
        .filters
        .iter()
        .map(|clause| clause.field_key())
        .collect::<BTreeSet<_>>();
    let mut filters = previous
        .filters
        .iter()
        .filter(|clause| !overridden.contains(&clause.field_key()))
        .cloned()
        .collect::<Vec<_>>();
    filters.extend(raw.filters.iter().cloned());

    RawIntent {
        metric: raw.metric.clone().or_else(|| previous.metric.clone()),
        dimensions: raw.dimensions.clone().or_else(|| previous.dimensions.clone()),
        filters,
        time_range: raw.time_range.clone().or_else(|| previous.time_range.clone()),
        time_grain: raw.time_grain.clone().or_else(|| previous.time_grain.clone()),
        limit: raw.limit.or(previous.limit),
        chart_type: raw.chart_type.clone().or_else(|| previous.chart_type.clone()),
        turn: None,
    }
}

fn normalize_slug(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Loads thread history, merges the new turn, and records the outcome.
///
/// `record` is a separate step so callers can persist only turns that went
/// on to validate; a rejected turn leaves the thread's context untouched.
#[derive(Clone)]
pub struct ContextManager {
    store: Arc<dyn ContextStore>,
}

impl ContextManager {
    #[must_use]
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryContextStore::new()))
    }

    pub fn resolve(&self, thread_id: &str, raw: &RawIntent) -> Result<ResolvedTurn> {
        let thread_id = checked_thread_id(thread_id)?;
        let history = self.store.load(thread_id)?;
        let resolved = merge_turn(raw, history.as_ref());
        debug!(
            thread_id,
            turn = resolved.turn_number,
            kind = resolved.kind.as_str(),
            "resolved conversational turn"
        );
        Ok(resolved)
    }

    pub fn record(&self, thread_id: &str, resolved: &ResolvedTurn) -> Result<()> {
        let thread_id = checked_thread_id(thread_id)?;
        self.store.save(&ConversationContext {
            thread_id: thread_id.to_string(),
            intent: resolved.intent.clone(),
            turn_count: resolved.turn_number,
            updated_at_utc: now_utc_rfc3339(),
        })
    }

    pub fn forget(&self, thread_id: &str) -> Result<bool> {
        self.store.clear(checked_thread_id(thread_id)?)
    }

    pub fn history(&self, thread_id: &str) -> Result<Option<ConversationContext>> {
        self.store.load(checked_thread_id(thread_id)?)
    }
}

fn checked_thread_id(thread_id: &str) -> Result<&str> {
    let trimmed = thread_id.trim();
    if trimmed.is_empty() {
        bail!("thread id must not be empty");
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        ContextManager, ContextStore, ConversationContext, InMemoryContextStore, classify_turn,
        merge_turn,
    };
    use crate::models::{FilterClause, RawIntent, RawTimeRange, TurnKind};

    fn metric_only(metric: &str) -> RawIntent {
        RawIntent {
            metric: Some(metric.to_string()),
            ..RawIntent::default()
        }
    }

    fn history(intent: RawIntent) -> ConversationContext {
        ConversationContext {
            thread_id: "t-1".to_string(),
            intent,
            turn_count: 1,
            updated_at_utc: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn classification_rules_are_explicit() {
        let previous = metric_only("sla_breach_rate");

        assert_eq!(classify_turn(&metric_only("claim_volume"), None), TurnKind::Fresh);
        assert_eq!(
            classify_turn(&RawIntent::default(), Some(&previous)),
            TurnKind::Refinement
        );
        assert_eq!(
            classify_turn(&metric_only(" SLA_Breach_Rate "), Some(&previous)),
            TurnKind::Refinement
        );
        assert_eq!(
            classify_turn(&metric_only("claim_volume"), Some(&previous)),
            TurnKind::Fresh
        );

        let mut forced_fresh = RawIntent::default();
        forced_fresh.turn = Some(TurnKind::Fresh);
        assert_eq!(classify_turn(&forced_fresh, Some(&previous)), TurnKind::Fresh);

        let mut forced_refinement = metric_only("claim_volume");
        forced_refinement.turn = Some(TurnKind::Refinement);
        assert_eq!(
            classify_turn(&forced_refinement, Some(&previous)),
            TurnKind::Refinement
        );
        assert_eq!(classify_turn(&forced_refinement, None), TurnKind::Fresh);
    }

    #[test]
    fn same_metric_matches_after_normalizing_both_turns() {
        let previous = metric_only("  Claim_Volume");

        assert_eq!(
            classify_turn(&metric_only("claim_volume "), Some(&previous)),
            TurnKind::Refinement
        );
        assert_eq!(
            classify_turn(&metric_only("claim_volume_total"), Some(&previous)),
            TurnKind::Fresh
        );
        assert_eq!(
            classify_turn(&metric_only("claim_volume"), Some(&RawIntent::default())),
            TurnKind::Fresh
        );
    }

    #[test]
    fn drill_down_inherits_metric_and_adds_filter() {
        let manager = ContextManager::in_memory();

        let first = manager
            .resolve("thread-a", &metric_only("sla_breach_rate"))
            .expect("first turn should resolve");
        assert_eq!(first.kind, TurnKind::Fresh);
        manager.record("thread-a", &first).expect("record first turn");

        let drill_down = RawIntent {
            filters: vec![FilterClause::new("adjuster_id", "=", "123")],
            ..RawIntent::default()
        };
        let second = manager
            .resolve("thread-a", &drill_down)
            .expect("second turn should resolve");

        assert_eq!(second.kind, TurnKind::Refinement);
        assert_eq!(second.turn_number, 2);
        assert_eq!(second.intent.metric.as_deref(), Some("sla_breach_rate"));
        assert_eq!(
            second.intent.filters,
            vec![FilterClause::new("adjuster_id", "=", "123")]
        );
    }

    #[test]
    fn refinement_replaces_filters_on_the_same_field_only() {
        let previous = RawIntent {
            metric: Some("claims_by_status".to_string()),
            dimensions: Some(vec!["region".to_string()]),
            filters: vec![
                FilterClause::new("region", "=", "west"),
                FilterClause::new("status", "=", "open"),
                FilterClause::new("region", "!=", "south"),
            ],
            time_range: Some(RawTimeRange {
                start: "2026-01-01".to_string(),
                end: "2026-03-31".to_string(),
            }),
            time_grain: Some("week".to_string()),
            ..RawIntent::default()
        };
        let raw = RawIntent {
            filters: vec![FilterClause::new("Region", "IN", "east,north")],
            time_grain: Some("month".to_string()),
            ..RawIntent::default()
        };

        let merged = merge_turn(&raw, Some(&history(previous))).intent;
        assert_eq!(
            merged.filters,
            vec![
                FilterClause::new("status", "=", "open"),
                FilterClause::new("Region", "IN", "east,north"),
            ]
        );
        assert_eq!(merged.dimensions, Some(vec!["region".to_string()]));
        assert_eq!(merged.time_grain.as_deref(), Some("month"));
        assert_eq!(
            merged.time_range.map(|range| range.start),
            Some("2026-01-01".to_string())
        );
    }

    #[test]
    fn fresh_turn_discards_previous_context() {
        let previous = RawIntent {
            metric: Some("sla_breach_rate".to_string()),
            filters: vec![FilterClause::new("region", "=", "west")],
            limit: Some(10),
            ..RawIntent::default()
        };
        let resolved = merge_turn(&metric_only("claim_volume"), Some(&history(previous)));
        assert_eq!(resolved.kind, TurnKind::Fresh);
        assert_eq!(resolved.intent, metric_only("claim_volume"));
        assert_eq!(resolved.turn_number, 2);
    }

    #[test]
    fn store_keeps_one_record_per_thread() {
        let store = Arc::new(InMemoryContextStore::new());
        let manager = ContextManager::new(store.clone());

        for metric in ["sla_breach_rate", "claim_volume", "total_paid_amount"] {
            let turn = manager
                .resolve("thread-b", &metric_only(metric))
                .expect("turn should resolve");
            manager.record("thread-b", &turn).expect("turn should record");
        }

        assert_eq!(store.len(), 1);
        let saved = store
            .load("thread-b")
            .expect("load should work")
            .expect("thread should exist");
        assert_eq!(saved.intent.metric.as_deref(), Some("total_paid_amount"));
        assert_eq!(saved.turn_count, 3);

        assert!(manager.forget("thread-b").expect("forget should work"));
        assert!(store.is_empty());
        assert!(manager.resolve("  ", &RawIntent::default()).is_err());
    }
}
