use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::anomaly::{
    AnomalyEngineOptions, DEFAULT_FETCH_TIMEOUT, DEFAULT_LOOKBACK_DAYS, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_THRESHOLD, DetectOptions,
};
use crate::catalog::{CatalogOptions, DEFAULT_CATALOG_TTL, DEFAULT_REFRESH_TIMEOUT};
use crate::validate::ValidationPolicy;

pub const DATA_DIR_NAME: &str = ".claimsight";
pub const DATABASE_FILE_NAME: &str = "claimsight.sqlite";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
}

impl RuntimePaths {
    /// Default location of the engine config file inside the data dir.
    #[must_use]
    pub fn default_config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    /// Resolves a user-supplied path (`~`, relative, absolute) the same way
    /// the data dir override is resolved.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        resolve_user_path(path, &self.home_dir, &self.cwd)
    }
}

pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    data_dir_override: Option<&Path>,
) -> Result<RuntimePaths> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let data_dir = match data_dir_override {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => normalize_lexical(&home_dir.join(DATA_DIR_NAME)),
    };
    let database_path = data_dir.join(DATABASE_FILE_NAME);

    Ok(RuntimePaths {
        home_dir,
        cwd,
        data_dir,
        database_path,
    })
}

fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            bail!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    pub ttl_secs: u64,
    pub refresh_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CATALOG_TTL.as_secs(),
            refresh_timeout_ms: duration_millis(DEFAULT_REFRESH_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnomalyConfig {
    pub lookback_days: u32,
    pub threshold: f64,
    pub fetch_timeout_ms: u64,
    pub max_concurrency: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            threshold: DEFAULT_THRESHOLD,
            fetch_timeout_ms: duration_millis(DEFAULT_FETCH_TIMEOUT),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Engine tuning read from an optional JSON file. Every field has a default,
/// so `{}` is a valid config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub validation: ValidationPolicy,
    pub catalog: CatalogConfig,
    pub anomaly: AnomalyConfig,
}

impl EngineConfig {
    #[must_use]
    pub const fn catalog_options(&self) -> CatalogOptions {
        CatalogOptions {
            ttl: Duration::from_secs(self.catalog.ttl_secs),
            refresh_timeout: Duration::from_millis(self.catalog.refresh_timeout_ms),
        }
    }

    #[must_use]
    pub const fn anomaly_engine_options(&self) -> AnomalyEngineOptions {
        AnomalyEngineOptions {
            fetch_timeout: Duration::from_millis(self.anomaly.fetch_timeout_ms),
            max_concurrency: self.anomaly.max_concurrency,
        }
    }

    #[must_use]
    pub fn detect_options(&self, metric_slugs: Vec<String>) -> DetectOptions {
        DetectOptions {
            metric_slugs,
            lookback_days: self.anomaly.lookback_days,
            threshold: self.anomaly.threshold,
        }
    }
}

/// Loads `path` when given. Without an explicit path, `fallback` is read if
/// it exists and defaults apply otherwise.
pub fn load_engine_config(path: Option<&Path>, fallback: Option<&Path>) -> Result<EngineConfig> {
    let path = match (path, fallback) {
        (Some(path), _) => path,
        (None, Some(fallback)) if fallback.is_file() => fallback,
        (None, _) => return Ok(EngineConfig::default()),
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read engine config: {}", path.display()))?;
    serde_json::from_str::<EngineConfig>(&raw)
        .with_context(|| format!("failed to parse engine config: {}", path.display()))
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
