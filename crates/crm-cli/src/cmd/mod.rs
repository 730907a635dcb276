pub mod config;
pub mod digest;
pub mod show;
pub mod simulate;
pub mod verify;

use anyhow::Context;
use crm_core::config::EngineConfig;
use crm_core::CrmError;
use std::path::Path;

/// Load the engine configuration, falling back to defaults when the file
/// does not exist.
pub fn load_config_or_default(path: &Path) -> anyhow::Result<EngineConfig> {
    match EngineConfig::load(path) {
        Ok(config) => Ok(config),
        Err(CrmError::ConfigNotFound(_)) => {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(EngineConfig::new("local"))
        }
        Err(e) => Err(e).with_context(|| format!("failed to load {}", path.display())),
    }
}
