use crate::error::{CrmError, Result};
use crate::graph::{Graph, DEFAULT_NETWORK_DELAY_MS};
use crate::throttle::ThrottlePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default file name of the engine configuration.
pub const CONFIG_FILE: &str = "crm.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ThrottleConfig
// ---------------------------------------------------------------------------

/// Static per-node job limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_job_limit")]
    pub default_job_limit: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_limits: BTreeMap<String, i32>,
}

fn default_job_limit() -> i32 {
    4
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            default_job_limit: default_job_limit(),
            node_limits: BTreeMap::new(),
        }
    }
}

impl ThrottlePolicy for ThrottleConfig {
    fn job_limit(&self, node: &str) -> i32 {
        self.node_limits
            .get(node)
            .copied()
            .unwrap_or(self.default_job_limit)
    }
}

// ---------------------------------------------------------------------------
// TransitionConfig
// ---------------------------------------------------------------------------

/// Defaults applied to graphs that do not carry their own values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Cooldown before recomputing after a restart; 0 recomputes at once.
    #[serde(default)]
    pub transition_delay_ms: i64,
    #[serde(default = "default_network_delay")]
    pub network_delay_ms: i64,
    #[serde(default = "default_network_delay")]
    pub stonith_timeout_ms: i64,
    /// Default batch limit; `<= 0` is unlimited.
    #[serde(default)]
    pub batch_limit: i32,
}

fn default_network_delay() -> i64 {
    DEFAULT_NETWORK_DELAY_MS
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            transition_delay_ms: 0,
            network_delay_ms: default_network_delay(),
            stonith_timeout_ms: default_network_delay(),
            batch_limit: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// FencingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FencingConfig {
    /// Failed attempts against one target before the engine gives up on it.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for FencingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// DigestConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Feature set of the oldest peer; selects the digest algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_set: Option<String>,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Name of the node this engine runs on.
    pub node: String,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub fencing: FencingConfig,
    #[serde(default)]
    pub digest: DigestConfig,
}

fn default_version() -> u32 {
    1
}

impl EngineConfig {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            version: 1,
            node: node.into(),
            throttle: ThrottleConfig::default(),
            transition: TransitionConfig::default(),
            fencing: FencingConfig::default(),
            digest: DigestConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CrmError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Fill in timing values a graph document left unset.
    pub fn apply_defaults(&self, graph: &mut Graph, explicit: &GraphOverrides) {
        if !explicit.network_delay {
            graph.network_delay = self.transition.network_delay_ms;
        }
        if !explicit.stonith_timeout {
            graph.stonith_timeout = self.transition.stonith_timeout_ms;
        }
        if !explicit.transition_delay {
            graph.transition_delay = self.transition.transition_delay_ms;
        }
        if !explicit.batch_limit {
            graph.batch_limit = self.transition.batch_limit;
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.node.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "node name is empty".to_string(),
            });
        }

        if self.throttle.default_job_limit <= 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "throttle.default_job_limit={} allows no resource operations",
                    self.throttle.default_job_limit
                ),
            });
        }
        for (node, limit) in &self.throttle.node_limits {
            if *limit <= 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("node '{node}' has job limit {limit}: nothing will run there"),
                });
            }
            if node.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "empty node name in throttle.node_limits".to_string(),
                });
            }
        }

        if self.transition.network_delay_ms <= 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "transition.network_delay_ms={} must be positive",
                    self.transition.network_delay_ms
                ),
            });
        }
        if self.transition.stonith_timeout_ms <= 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "transition.stonith_timeout_ms={} leaves fencing without a deadline",
                    self.transition.stonith_timeout_ms
                ),
            });
        }
        if self.transition.transition_delay_ms < 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "transition.transition_delay_ms is negative; treated as 0".to_string(),
            });
        }

        if self.fencing.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "fencing.max_attempts=0: every fencing failure is excessive".to_string(),
            });
        }

        if let Some(version) = &self.digest.feature_set {
            let well_formed = !version.is_empty()
                && version
                    .split('.')
                    .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
            if !well_formed {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("digest.feature_set '{version}' is not a dotted version"),
                });
            }
        }

        warnings
    }
}

/// Which graph timing values a document set explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphOverrides {
    pub network_delay: bool,
    pub stonith_timeout: bool,
    pub transition_delay: bool,
    pub batch_limit: bool,
}
