//! Context configuration.
//!
//! A [`ContextConfig`] fixes the capacities of the context's tables, the set of targets
//! and their priority, and a few execution switches. It can be built in code with the
//! `with_*` builder methods or loaded from TOML:
//!
//! ```toml
//! max_references = 8192
//! lock_timeout_ms = 250
//! parallel_waves = true
//!
//! [[targets]]
//! name = "khronos.tiling"
//! priority = 0
//!
//! [[targets]]
//! name = "khronos.c_model"
//! priority = 1
//! ```

use crate::core::types::Border;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default reference table capacity.
pub const DEFAULT_MAX_REFERENCES: usize = 4096;

/// Default number of kernel slots per target.
pub const DEFAULT_MAX_KERNELS: usize = 256;

/// Default node capacity of one graph.
pub const DEFAULT_MAX_NODES: usize = 512;

/// Default maximum kernel parameter count.
pub const DEFAULT_MAX_PARAMETERS: usize = 16;

/// Default memory limit for object storage (1 GiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 1024 * 1024 * 1024;

/// Default tile scratch memory limit per node (16 MiB).
pub const DEFAULT_TILE_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Name of the generic C-model target.
pub const TARGET_C_MODEL: &str = "khronos.c_model";

/// Name of the tiling target.
pub const TARGET_TILING: &str = "khronos.tiling";

/// Errors while loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Placement of one target in the dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target name, e.g. `khronos.tiling`.
    pub name: String,
    /// Lower values are tried first.
    #[serde(default)]
    pub priority: u32,
    /// Disabled targets are never initialized.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
        }
    }
}

/// Configuration of a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Capacity of the reference table.
    pub max_references: usize,
    /// Kernel slots per target.
    pub max_kernels_per_target: usize,
    /// Node capacity of one graph.
    pub max_nodes_per_graph: usize,
    /// Maximum parameter count of a kernel.
    pub max_parameters: usize,
    /// Targets to bring up, with their dispatch priority.
    pub targets: Vec<TargetConfig>,
    /// Border used by immediate-mode helpers.
    pub immediate_border: Border,
    /// How long a plane lock waits before failing with `NoResources`.
    pub lock_timeout_ms: u64,
    /// Capacity of the error-log ring.
    pub log_capacity: usize,
    /// Upper bound on object storage in bytes.
    pub memory_limit: usize,
    /// Upper bound on one node's tile scratch memory in bytes.
    pub tile_memory_limit: usize,
    /// Run independent nodes of a wave on the rayon pool.
    pub parallel_waves: bool,
    /// Run replicas of a replicated node on the rayon pool.
    pub parallel_replicas: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_references: DEFAULT_MAX_REFERENCES,
            max_kernels_per_target: DEFAULT_MAX_KERNELS,
            max_nodes_per_graph: DEFAULT_MAX_NODES,
            max_parameters: DEFAULT_MAX_PARAMETERS,
            targets: vec![
                TargetConfig::new(TARGET_TILING, 0),
                TargetConfig::new(TARGET_C_MODEL, 1),
            ],
            immediate_border: Border::default(),
            lock_timeout_ms: 1000,
            log_capacity: 256,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            tile_memory_limit: DEFAULT_TILE_MEMORY_LIMIT,
            parallel_waves: false,
            parallel_replicas: false,
        }
    }
}

impl ContextConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ContextConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded context config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Check capacities and target names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_references < 16 {
            return Err(ConfigError::Invalid(format!(
                "max_references must be at least 16, got {}",
                self.max_references
            )));
        }
        if self.max_kernels_per_target == 0 || self.max_nodes_per_graph == 0 {
            return Err(ConfigError::Invalid(
                "kernel and node capacities must be non-zero".to_string(),
            ));
        }
        if self.max_parameters == 0 {
            return Err(ConfigError::Invalid("max_parameters must be non-zero".to_string()));
        }
        for (i, t) in self.targets.iter().enumerate() {
            if t.name.is_empty() {
                return Err(ConfigError::Invalid(format!("target #{} has an empty name", i)));
            }
            if self.targets[..i].iter().any(|o| o.name == t.name) {
                return Err(ConfigError::Invalid(format!("target '{}' listed twice", t.name)));
            }
        }
        Ok(())
    }

    /// Plane lock timeout as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Enabled targets sorted by priority.
    pub fn target_order(&self) -> Vec<&TargetConfig> {
        let mut order: Vec<&TargetConfig> = self.targets.iter().filter(|t| t.enabled).collect();
        order.sort_by_key(|t| t.priority);
        order
    }

    pub fn with_max_references(mut self, n: usize) -> Self {
        self.max_references = n;
        self
    }

    pub fn with_max_kernels_per_target(mut self, n: usize) -> Self {
        self.max_kernels_per_target = n;
        self
    }

    pub fn with_max_nodes_per_graph(mut self, n: usize) -> Self {
        self.max_nodes_per_graph = n;
        self
    }

    pub fn with_targets(mut self, targets: Vec<TargetConfig>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_immediate_border(mut self, border: Border) -> Self {
        self.immediate_border = border;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Set the object memory limit in bytes.
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    pub fn with_tile_memory_limit(mut self, limit: usize) -> Self {
        self.tile_memory_limit = limit;
        self
    }

    /// Enable or disable parallel execution of independent nodes.
    pub fn with_parallel_waves(mut self, parallel: bool) -> Self {
        self.parallel_waves = parallel;
        self
    }

    /// Enable or disable parallel execution of node replicas.
    pub fn with_parallel_replicas(mut self, parallel: bool) -> Self {
        self.parallel_replicas = parallel;
        self
    }
}
