use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::RelayConfig;

/// Loads (and reloads on demand) the Relay configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<RelayConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > RELAY_CONFIG env > ~/.relay/relay.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("RELAY_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".relay")
            .join("relay.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> relay_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            RelayConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(relay_core::RelayError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    fn read(path: &Path) -> relay_core::Result<RelayConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<RelayConfig>(&raw).map_err(|e| {
            relay_core::RelayError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> RelayConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<RelayConfig>> {
        Arc::clone(&self.config)
    }

    /// Path the config was (or would have been) loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (RELAY_AGENT_MODEL, RELAY_LOG_LEVEL, ...).
    pub fn apply_env_overrides(mut config: RelayConfig) -> RelayConfig {
        if let Ok(v) = std::env::var("RELAY_AGENT_MODEL") {
            config.agent.model = v;
        }
        if let Ok(v) = std::env::var("RELAY_SERVER_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("RELAY_LOG_LEVEL") {
            config.logging.level = v;
        }
        // Credentials: the config file wins, env is the fallback.
        if config.services.openai_api_key.is_none()
            && let Ok(v) = std::env::var("OPENAI_API_KEY")
        {
            config.services.openai_api_key = Some(v);
        }
        if config.services.base_url.is_none()
            && let Ok(v) = std::env::var("OPENAI_BASE_URL")
        {
            config.services.base_url = Some(v);
        }
        config
    }

    /// Reload the config from disk. Invalid files leave the current config in place.
    pub fn reload(&self) -> relay_core::Result<()> {
        if !self.config_path.exists() {
            return Err(relay_core::RelayError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read(&self.config_path)?);
        new_config.validate().map_err(relay_core::RelayError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
