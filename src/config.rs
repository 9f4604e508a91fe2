//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - meridian.toml (default configuration)
//! - meridian.local.toml (git-ignored local overrides)
//! - Environment variables (MERIDIAN_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # meridian.toml
//! [execution]
//! morsel_rows = 10000
//! memory_budget_bytes = 1073741824
//!
//! [execution.joins]
//! nested_loop_threshold = 1000
//! bloom_filter_key_limit = 16777216
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! MERIDIAN_EXECUTION__MORSEL_ROWS=65536
//! MERIDIAN_EXECUTION__JOINS__NESTED_LOOP_THRESHOLD=500
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Target rows per morsel exchanged between operators
    #[serde(default = "default_morsel_rows")]
    pub morsel_rows: usize,

    /// Per-query memory budget in bytes, checked at morsel boundaries
    /// (0 = unlimited)
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: usize,

    /// Per-query wall-clock timeout in seconds (0 = no timeout)
    #[serde(default)]
    pub timeout_seconds: u64,

    /// Read independent scan units in parallel and reassemble in order
    #[serde(default = "default_true")]
    pub parallel_scan: bool,

    /// Number of worker threads for parallel unit reads
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub num_threads: usize,

    /// Cached optimized plans for repeated statements (0 = disabled)
    #[serde(default)]
    pub plan_cache_entries: usize,

    /// Join algorithm tuning
    #[serde(default)]
    pub joins: JoinConfig,
}

/// Join algorithm tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Inputs at or below this row count use a nested loop join
    #[serde(default = "default_nested_loop_threshold")]
    pub nested_loop_threshold: usize,

    /// Build sides larger than this skip the bloom filter
    #[serde(default = "default_bloom_key_limit")]
    pub bloom_filter_key_limit: usize,
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Move eligible predicates past projections, joins and into scans
    #[serde(default = "default_true")]
    pub enable_predicate_pushdown: bool,

    /// Annotate scans with the minimal required column set
    #[serde(default = "default_true")]
    pub enable_projection_pushdown: bool,

    /// Fuse ORDER BY + LIMIT into a bounded heap sort
    #[serde(default = "default_true")]
    pub enable_operator_fusion: bool,

    /// Push limits past projections and into scans
    #[serde(default = "default_true")]
    pub enable_limit_pushdown: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_morsel_rows() -> usize {
    10_000
}
fn default_memory_budget() -> usize {
    1 << 30
}
fn default_nested_loop_threshold() -> usize {
    1000
}
fn default_bloom_key_limit() -> usize {
    16 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            morsel_rows: default_morsel_rows(),
            memory_budget_bytes: default_memory_budget(),
            timeout_seconds: 0,
            parallel_scan: true,
            num_threads: 0,
            plan_cache_entries: 0,
            joins: JoinConfig::default(),
        }
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        JoinConfig {
            nested_loop_threshold: default_nested_loop_threshold(),
            bloom_filter_key_limit: default_bloom_key_limit(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            enable_predicate_pushdown: true,
            enable_projection_pushdown: true,
            enable_operator_fusion: true,
            enable_limit_pushdown: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. meridian.toml (base configuration)
    /// 2. meridian.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (MERIDIAN_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("meridian.toml"))
            .merge(Toml::file("meridian.local.toml"))
            .merge(Env::prefixed("MERIDIAN_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MERIDIAN_").split("__"))
            .extract()
    }

    /// Effective worker thread count for parallel scans.
    pub fn scan_threads(&self) -> usize {
        if self.execution.num_threads == 0 {
            num_cpus::get()
        } else {
            self.execution.num_threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.execution.morsel_rows, 10_000);
        assert_eq!(config.execution.joins.nested_loop_threshold, 1000);
        assert_eq!(
            config.execution.joins.bloom_filter_key_limit,
            16 * 1024 * 1024
        );
        assert!(config.optimizer.enable_predicate_pushdown);
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");

        assert!(toml_str.contains("[execution]"));
        assert!(toml_str.contains("[execution.joins]"));
        assert!(toml_str.contains("[optimizer]"));
    }

    #[test]
    fn test_scan_threads_default_to_cores() {
        let config = EngineConfig::default();
        assert!(config.scan_threads() >= 1);
    }
}
