//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! pipeline core. All types derive Serde traits for deserialization from
//! config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CoreConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Preemptive refresh settings.
    pub refresh: RefreshConfig,

    /// Route table, checked by priority then declaration order.
    pub routes: Vec<RouteConfig>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching. When disabled every request recomputes.
    pub enabled: bool,

    /// Maximum number of entries before the oldest is evicted.
    pub max_entries: usize,

    /// Artifacts larger than this are served but not stored.
    pub max_artifact_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            max_artifact_bytes: 8 * 1024 * 1024, // 8MB
        }
    }
}

/// Preemptive refresh configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// First run of a job is delayed by a random share of its TTL, up to this ratio.
    pub jitter_ratio: f64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { jitter_ratio: 0.1 }
    }
}

/// Route configuration mapping a URI pattern to a pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging, metrics and cache keys.
    pub name: String,

    /// Wildcard pattern matched against the normalized URI.
    pub pattern: Option<String>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Whether responses of this route may be cached.
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,

    /// Request parameters folded into the cache key.
    #[serde(default)]
    pub cache_params: Vec<String>,

    /// Streaming or buffered output.
    #[serde(default)]
    pub output: OutputMode,

    /// Default stages.
    #[serde(flatten)]
    pub pipeline: PipelineConfig,

    /// Alternative stages selected by a request parameter.
    #[serde(default)]
    pub branches: Vec<BranchConfig>,
}

fn default_cacheable() -> bool {
    true
}

impl RouteConfig {
    /// Route with a pattern and no stages, cacheable, streaming.
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: Some(pattern.into()),
            priority: 0,
            cacheable: true,
            cache_params: Vec::new(),
            output: OutputMode::default(),
            pipeline: PipelineConfig::default(),
            branches: Vec::new(),
        }
    }
}

/// How pipeline output reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Write straight through; content length unknown.
    #[default]
    Streaming,
    /// Materialize the whole response first so its length is known.
    Buffered,
}

/// Stage list of a pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub generator: Option<ComponentConfig>,
    pub reader: Option<ComponentConfig>,
    pub transformers: Vec<ComponentConfig>,
    pub serializer: Option<ComponentConfig>,
}

impl PipelineConfig {
    /// Apply a branch's stages over these defaults.
    ///
    /// A branch reader replaces the whole generator chain; a branch generator
    /// replaces a default reader. Non-empty branch transformers replace the
    /// default list.
    pub fn overlay(&self, branch: &PipelineConfig) -> PipelineConfig {
        if branch.reader.is_some() {
            return PipelineConfig {
                reader: branch.reader.clone(),
                ..PipelineConfig::default()
            };
        }

        let mut merged = self.clone();
        if let Some(generator) = &branch.generator {
            merged.generator = Some(generator.clone());
            merged.reader = None;
        }
        if !branch.transformers.is_empty() {
            merged.transformers = branch.transformers.clone();
        }
        if let Some(serializer) = &branch.serializer {
            merged.serializer = Some(serializer.clone());
        }
        merged
    }
}

/// A pipeline component reference.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ComponentConfig {
    /// Role name resolved by the component factory.
    #[serde(rename = "type")]
    pub role: String,

    /// Parameters; values may reference `{1}`, `{0}` or `{request-param}`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ComponentConfig {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// A branch point: selected when a request parameter equals a value.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BranchConfig {
    /// Request parameter inspected.
    pub parameter: String,

    /// Value that selects this branch.
    pub equals: String,

    /// Stages overriding the route defaults.
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

impl BranchConfig {
    /// Stable label used in logs and cache keys.
    pub fn label(&self) -> String {
        format!("{}={}", self.parameter, self.equals)
    }
}
