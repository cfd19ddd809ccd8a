pub mod builtin;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CatalogError, StorageError};
use crate::models::metric::RESERVED_OUTPUT_COLUMNS;
use crate::models::{
    ColumnBinding, MetricDefinition, ResultShape, is_safe_identifier, is_valid_slug,
};
use crate::utils::deadline::fetch_with_timeout;
use crate::utils::time::now_utc_rfc3339;

pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fields every metric may be filtered on, whatever its own bindings say.
pub const GLOBAL_FILTER_FIELDS: &[(&str, &str)] = &[
    ("region", "region"),
    ("status", "status"),
    ("line_of_business", "line_of_business"),
    ("adjuster_id", "adjuster_id"),
];

/// Where metric definitions live. Implementations are called from a worker
/// thread with a deadline, so they must be shareable.
pub trait CatalogSource: Send + Sync {
    fn fetch_definitions(&self) -> anyhow::Result<Vec<MetricDefinition>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCatalogSource {
    definitions: Vec<MetricDefinition>,
}

impl StaticCatalogSource {
    #[must_use]
    pub fn new(definitions: Vec<MetricDefinition>) -> Self {
        Self { definitions }
    }
}

impl CatalogSource for StaticCatalogSource {
    fn fetch_definitions(&self) -> anyhow::Result<Vec<MetricDefinition>> {
        Ok(self.definitions.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedDefinition {
    pub slug: String,
    pub reason: String,
}

/// Immutable view of the catalog. Refresh builds a new one and swaps the
/// pointer; holders of an old snapshot keep a consistent view.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    metrics: BTreeMap<String, Arc<MetricDefinition>>,
    global_filters: Vec<ColumnBinding>,
    rejected: Vec<RejectedDefinition>,
    loaded_at_utc: String,
}

impl CatalogSnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            metrics: BTreeMap::new(),
            global_filters: default_global_filters(),
            rejected: Vec::new(),
            loaded_at_utc: now_utc_rfc3339(),
        }
    }

    /// Checks every definition; bad ones are set aside in `rejected` and the
    /// rest still load. A later duplicate slug replaces an earlier one.
    #[must_use]
    pub fn from_definitions(definitions: Vec<MetricDefinition>) -> Self {
        let mut snapshot = Self::empty();
        for definition in definitions {
            match check_definition(&definition) {
                Ok(()) => {
                    snapshot
                        .metrics
                        .insert(definition.slug.clone(), Arc::new(definition));
                }
                Err(reason) => {
                    warn!(slug = %definition.slug, %reason, "rejecting metric definition");
                    snapshot.rejected.push(RejectedDefinition {
                        slug: definition.slug,
                        reason,
                    });
                }
            }
        }
        snapshot
    }

    pub fn lookup(&self, slug: &str) -> Result<Arc<MetricDefinition>, CatalogError> {
        self.metrics
            .get(slug)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(slug.to_string()))
    }

    pub fn allowed_dimensions(&self, slug: &str) -> Result<BTreeSet<String>, CatalogError> {
        Ok(self.lookup(slug)?.allowed_dimension_keys())
    }

    pub fn column_for(&self, slug: &str, dimension_key: &str) -> Result<String, CatalogError> {
        let definition = self.lookup(slug)?;
        definition
            .dimension_column(dimension_key)
            .map(ToString::to_string)
            .ok_or_else(|| CatalogError::DimensionNotFound {
                metric: slug.to_string(),
                dimension: dimension_key.to_string(),
            })
    }

    #[must_use]
    pub fn global_filter_column(&self, field: &str) -> Option<&str> {
        self.global_filters
            .iter()
            .find(|binding| binding.key == field)
            .map(|binding| binding.column.as_str())
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Arc<MetricDefinition>> {
        self.metrics.values()
    }

    #[must_use]
    pub fn slugs(&self) -> Vec<String> {
        self.metrics.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    #[must_use]
    pub fn rejected(&self) -> &[RejectedDefinition] {
        &self.rejected
    }

    #[must_use]
    pub fn loaded_at_utc(&self) -> &str {
        &self.loaded_at_utc
    }
}

fn default_global_filters() -> Vec<ColumnBinding> {
    GLOBAL_FILTER_FIELDS
        .iter()
        .map(|(key, column)| ColumnBinding::new(*key, *column))
        .collect()
}

fn check_definition(definition: &MetricDefinition) -> Result<(), String> {
    if !is_valid_slug(&definition.slug) {
        return Err(format!("slug `{}` is not a valid metric slug", definition.slug));
    }

    if let Some(identifier) = definition
        .identifiers()
        .into_iter()
        .find(|identifier| !is_safe_identifier(identifier))
    {
        return Err(format!("`{identifier}` is not a plain SQL identifier"));
    }

    let mut seen = BTreeSet::new();
    for binding in definition.dimensions.iter().chain(&definition.filters) {
        if !is_valid_slug(&binding.key) {
            return Err(format!("binding key `{}` is not a valid key", binding.key));
        }
        if RESERVED_OUTPUT_COLUMNS.contains(&binding.key.as_str()) {
            return Err(format!("binding key `{}` is reserved", binding.key));
        }
        if !seen.insert(binding.key.as_str()) {
            return Err(format!("binding key `{}` is declared twice", binding.key));
        }
    }

    match (definition.result_shape, definition.dimensions.len()) {
        (ResultShape::TimeSeries, 0) => Ok(()),
        (ResultShape::TimeSeries, _) => {
            Err("time_series metrics must not declare dimensions".to_string())
        }
        (ResultShape::Dimensional | ResultShape::Table, 0) => Err(format!(
            "{} metrics need at least one dimension",
            definition.result_shape.as_str()
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogOptions {
    pub ttl: Duration,
    pub refresh_timeout: Duration,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CATALOG_TTL,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogStatus {
    pub metric_count: usize,
    pub rejected_count: usize,
    pub loaded_at_utc: String,
    pub stale: bool,
}

#[derive(Debug)]
struct CatalogState {
    snapshot: Arc<CatalogSnapshot>,
    last_attempt: Option<Instant>,
}

/// Shared, read-mostly metric catalog with pull-based TTL refresh.
///
/// A failed refresh keeps serving the previous snapshot. Only one refresh
/// runs at a time; readers that find the catalog stale while another refresh
/// is in flight return the current snapshot instead of waiting.
pub struct MetricCatalog {
    source: Arc<dyn CatalogSource>,
    state: RwLock<CatalogState>,
    refresh_gate: Mutex<()>,
    options: CatalogOptions,
}

impl MetricCatalog {
    #[must_use]
    pub fn new(source: Arc<dyn CatalogSource>, options: CatalogOptions) -> Self {
        Self {
            source,
            state: RwLock::new(CatalogState {
                snapshot: Arc::new(CatalogSnapshot::empty()),
                last_attempt: None,
            }),
            refresh_gate: Mutex::new(()),
            options,
        }
    }

    /// Catalog over a fixed set of definitions, loaded eagerly.
    #[must_use]
    pub fn from_definitions(definitions: Vec<MetricDefinition>) -> Self {
        let catalog = Self::new(
            Arc::new(StaticCatalogSource::new(definitions.clone())),
            CatalogOptions::default(),
        );
        catalog.install(CatalogSnapshot::from_definitions(definitions));
        catalog
    }

    /// Current snapshot, refreshing first if the TTL has lapsed.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        if self.is_stale() {
            self.refresh_if_idle();
        }
        self.current()
    }

    pub fn lookup(&self, slug: &str) -> Result<Arc<MetricDefinition>, CatalogError> {
        self.snapshot().lookup(slug)
    }

    pub fn allowed_dimensions(&self, slug: &str) -> Result<BTreeSet<String>, CatalogError> {
        self.snapshot().allowed_dimensions(slug)
    }

    pub fn column_for(&self, slug: &str, dimension_key: &str) -> Result<String, CatalogError> {
        self.snapshot().column_for(slug, dimension_key)
    }

    /// Fetches and swaps in a fresh snapshot, waiting for any refresh already
    /// in flight. On failure the previous snapshot stays in effect.
    pub fn refresh(&self) -> Result<(), StorageError> {
        let _gate = self
            .refresh_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.refresh_locked()
    }

    #[must_use]
    pub fn status(&self) -> CatalogStatus {
        let snapshot = self.current();
        CatalogStatus {
            metric_count: snapshot.len(),
            rejected_count: snapshot.rejected().len(),
            loaded_at_utc: snapshot.loaded_at_utc().to_string(),
            stale: self.is_stale(),
        }
    }

    fn refresh_if_idle(&self) {
        let _gate = match self.refresh_gate.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("catalog refresh already in flight; serving current snapshot");
                return;
            }
        };
        if !self.is_stale() {
            return;
        }
        if let Err(error) = self.refresh_locked() {
            warn!(%error, "catalog refresh failed; serving previous snapshot");
        }
    }

    fn refresh_locked(&self) -> Result<(), StorageError> {
        let source = Arc::clone(&self.source);
        let fetched = fetch_with_timeout("catalog refresh", self.options.refresh_timeout, move || {
            source.fetch_definitions()
        });

        match fetched {
            Ok(definitions) => {
                let snapshot = CatalogSnapshot::from_definitions(definitions);
                info!(
                    metrics = snapshot.len(),
                    rejected = snapshot.rejected().len(),
                    "catalog refreshed"
                );
                self.install(snapshot);
                Ok(())
            }
            Err(error) => {
                self.write_state().last_attempt = Some(Instant::now());
                Err(error)
            }
        }
    }

    fn install(&self, snapshot: CatalogSnapshot) {
        let mut state = self.write_state();
        state.snapshot = Arc::new(snapshot);
        state.last_attempt = Some(Instant::now());
    }

    fn current(&self) -> Arc<CatalogSnapshot> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state.snapshot)
    }

    fn is_stale(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .last_attempt
            .is_none_or(|attempt| attempt.elapsed() >= self.options.ttl)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
