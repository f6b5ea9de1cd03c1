//! Configuration management for vigild.
//!
//! Loads settings from `--config`, then /etc/vigil/config.toml, or uses
//! defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use vigil_common::{DEFAULT_BIND, SERVICE_NAME};

use crate::cache::MAX_ENTRY_TTL;
use crate::health::DEADLINE_CEILING;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/vigil/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Service name reported in health documents
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_service() -> String {
    SERVICE_NAME.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            service: default_service(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Global aggregate deadline (clamped to 30 s)
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// How long a report is reused before probing again
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Probe timeout for dependencies without their own
    #[serde(default = "default_probe_timeout_ms")]
    pub default_probe_timeout_ms: u64,
}

fn default_deadline_ms() -> u64 {
    5_000
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            debounce_ms: default_debounce_ms(),
            default_probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// GET `target` (a URL)
    Http,
    /// Connect to `target` (`host:port`)
    Tcp,
    /// PING the configured cache backend; `target` is ignored
    Cache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub name: String,
    pub kind: CheckKind,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub degraded_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_inference_url")]
    pub inference_url: String,

    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,

    /// Registered dependency consulted before calling inference
    #[serde(default = "default_inference_dependency")]
    pub inference_dependency: String,

    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,

    #[serde(default = "default_enrichment_timeout_ms")]
    pub enrichment_timeout_ms: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_inference_url() -> String {
    "http://127.0.0.1:8081/v1/rank".to_string()
}

fn default_metadata_url() -> String {
    "http://127.0.0.1:8082/v1/".to_string()
}

fn default_inference_dependency() -> String {
    "inference".to_string()
}

fn default_inference_timeout_ms() -> u64 {
    3_000
}

fn default_enrichment_timeout_ms() -> u64 {
    2_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            inference_url: default_inference_url(),
            metadata_url: default_metadata_url(),
            inference_dependency: default_inference_dependency(),
            inference_timeout_ms: default_inference_timeout_ms(),
            enrichment_timeout_ms: default_enrichment_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Resp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_backend")]
    pub backend: CacheBackend,

    /// `host:port` of the RESP store
    #[serde(default = "default_cache_address")]
    pub address: String,

    /// Entry bound of the memory backend
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_backend() -> CacheBackend {
    CacheBackend::Memory
}

fn default_cache_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_capacity() -> usize {
    10_000
}

fn default_io_timeout_ms() -> u64 {
    500
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            address: default_cache_address(),
            capacity: default_capacity(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default = "default_dependencies")]
    pub dependencies: Vec<DependencyConfig>,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_dependencies() -> Vec<DependencyConfig> {
    vec![
        DependencyConfig {
            name: "inference".to_string(),
            kind: CheckKind::Http,
            target: "http://127.0.0.1:8081/health".to_string(),
            critical: true,
            timeout_ms: None,
            degraded_after_ms: Some(1_000),
        },
        DependencyConfig {
            name: "metadata".to_string(),
            kind: CheckKind::Http,
            target: "http://127.0.0.1:8082/health".to_string(),
            critical: false,
            timeout_ms: None,
            degraded_after_ms: None,
        },
        DependencyConfig {
            name: "cache".to_string(),
            kind: CheckKind::Cache,
            target: String::new(),
            critical: false,
            timeout_ms: Some(1_000),
            degraded_after_ms: None,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            health: HealthConfig::default(),
            dependencies: default_dependencies(),
            workflow: WorkflowConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Load from an explicit path (errors are fatal), else from
    /// [`CONFIG_PATH`] falling back to defaults. The result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load_from_path(Path::new(CONFIG_PATH)).unwrap_or_else(|e| {
                warn!("Config not loaded, using defaults: {}", e);
                Config::default()
            }),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.health.deadline_ms == 0 {
            return invalid("health.deadline_ms must be non-zero".into());
        }
        if self.health.default_probe_timeout_ms == 0 {
            return invalid("health.default_probe_timeout_ms must be non-zero".into());
        }
        if self.health.deadline_ms > DEADLINE_CEILING.as_millis() as u64 {
            warn!(
                "health.deadline_ms {} exceeds the {} s ceiling and will be clamped",
                self.health.deadline_ms,
                DEADLINE_CEILING.as_secs()
            );
        }

        let mut names = HashSet::new();
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                return invalid("dependency with empty name".into());
            }
            if !names.insert(dep.name.as_str()) {
                return invalid(format!("duplicate dependency name '{}'", dep.name));
            }
            if dep.timeout_ms == Some(0) {
                return invalid(format!("dependency '{}' has a zero timeout", dep.name));
            }
            if dep.kind != CheckKind::Cache && dep.target.trim().is_empty() {
                return invalid(format!("dependency '{}' needs a target", dep.name));
            }
            if dep.kind == CheckKind::Http && reqwest::Url::parse(&dep.target).is_err() {
                return invalid(format!(
                    "dependency '{}' target is not a URL: {}",
                    dep.name, dep.target
                ));
            }
            if self.probe_timeout(dep) > self.deadline() {
                warn!(
                    "Dependency '{}' timeout exceeds the aggregate deadline; it will be cut off at {:?}",
                    dep.name,
                    self.deadline()
                );
            }
        }

        if !names.contains(self.workflow.inference_dependency.as_str()) {
            return invalid(format!(
                "workflow.inference_dependency '{}' is not a registered dependency",
                self.workflow.inference_dependency
            ));
        }
        if self.workflow.inference_timeout_ms == 0 || self.workflow.enrichment_timeout_ms == 0 {
            return invalid("workflow timeouts must be non-zero".into());
        }
        if self.workflow.cache_ttl_secs == 0 {
            return invalid("workflow.cache_ttl_secs must be non-zero".into());
        }
        if self.workflow.cache_ttl_secs > MAX_ENTRY_TTL.as_secs() {
            return invalid(format!(
                "workflow.cache_ttl_secs must be at most {}",
                MAX_ENTRY_TTL.as_secs()
            ));
        }
        for (field, url) in [
            ("inference_url", &self.workflow.inference_url),
            ("metadata_url", &self.workflow.metadata_url),
        ] {
            if reqwest::Url::parse(url).is_err() {
                return invalid(format!("workflow.{} is not a URL: {}", field, url));
            }
        }

        if self.cache.io_timeout_ms == 0 {
            return invalid("cache.io_timeout_ms must be non-zero".into());
        }

        Ok(())
    }

    /// Effective aggregate deadline
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.health.deadline_ms).min(DEADLINE_CEILING)
    }

    pub fn probe_timeout(&self, dep: &DependencyConfig) -> Duration {
        Duration::from_millis(dep.timeout_ms.unwrap_or(self.health.default_probe_timeout_ms))
    }
}
