use crate::lifecycle::LifecycleConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use traceflow_engine::ReducerConfig;
use traceflow_store::{OwnershipPolicy, StoreConfig};

/// Resolve the data directory based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. TRACEFLOW_PATH environment variable (with tilde expansion)
/// 3. XDG data directory
/// 4. ~/.traceflow
pub fn resolve_data_path(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("TRACEFLOW_PATH") {
        return Ok(expand_tilde(&env_path));
    }

    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("traceflow"));
    }

    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".traceflow"));
    }

    Err(Error::Config(
        "Could not determine data path: no HOME directory or XDG data directory found"
            .to_string(),
    ))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TraceflowConfig {
    /// SQLite file backing the durable tiers; in-memory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub reducer: ReducerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub ownership: OwnershipPolicy,
}

impl TraceflowConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: TraceflowConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(resolve_data_path(None)?.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use traceflow_store::{AgentOwnership, Sniffing};
    use traceflow_types::AgentId;

    #[test]
    fn test_config_default() {
        let config = TraceflowConfig::default();
        assert_eq!(config.reducer.model_pairing_lookback, 3);
        assert_eq!(config.store.max_traces_per_node, 10);
        assert!(config.cache_path.is_none());
    }

    #[test]
    fn test_config_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = TraceflowConfig::default();
        config.cache_path = Some(temp_dir.path().join("traces.db"));
        config.lifecycle.grace_period_ms = 250;
        config.ownership = OwnershipPolicy::default().with_agent(
            AgentId::Personalization,
            AgentOwnership {
                sniffing: Sniffing::Titles,
                accept_supervisor_traces: true,
            },
        );

        config.save_to(&config_path)?;
        assert!(config_path.exists());

        let loaded = TraceflowConfig::load_from(&config_path)?;
        assert_eq!(loaded, config);

        Ok(())
    }

    #[test]
    fn test_partial_file_uses_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[reducer]\nmodel_pairing_lookback = 5\n\n\
             [ownership.agents.ts-agent]\nsniffing = \"off\"\n",
        )?;

        let config = TraceflowConfig::load_from(&config_path)?;
        assert_eq!(config.reducer.model_pairing_lookback, 5);
        assert_eq!(config.lifecycle, LifecycleConfig::default());
        assert_eq!(
            config.ownership.for_agent(AgentId::Troubleshoot).sniffing,
            Sniffing::Off
        );

        Ok(())
    }

    #[test]
    fn test_invalid_toml_is_config_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "[reducer\n")?;

        let err = TraceflowConfig::load_from(&config_path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        Ok(())
    }

    #[test]
    fn test_load_nonexistent_returns_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = TraceflowConfig::load_from(&config_path)?;
        assert_eq!(config, TraceflowConfig::default());

        Ok(())
    }

    #[test]
    fn test_explicit_path_expands_tilde() -> Result<()> {
        let plain = resolve_data_path(Some("/var/lib/traceflow"))?;
        assert_eq!(plain, PathBuf::from("/var/lib/traceflow"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_data_path(Some("~/tf"))?, home.join("tf"));
        }
        Ok(())
    }
}
