//! Config file loading with environment overrides.

use shv_broker::{BrokerConfig, ConfigError, ConfigSource};
use std::path::PathBuf;
use tracing::info;

/// Loads [`BrokerConfig`] from a TOML file, or defaults when no file is
/// given, then applies `SHV_*` environment overrides.
#[derive(Debug, Clone, Default)]
pub struct FileConfigSource {
    path: Option<PathBuf>,
}

impl FileConfigSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<BrokerConfig, ConfigError> {
        let mut config = match &self.path {
            Some(path) => {
                let load_error = |reason: String| ConfigError::Load {
                    path: path.display().to_string(),
                    reason,
                };
                let text = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
                let config: BrokerConfig = toml::from_str(&text).map_err(|e| load_error(e.to_string()))?;
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            None => BrokerConfig::default(),
        };
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }
}

/// Apply `SHV_BROKER_NAME` and `SHV_LISTEN` (comma separated).
pub fn apply_env_overrides(config: &mut BrokerConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(name) = var("SHV_BROKER_NAME").filter(|v| !v.is_empty()) {
        config.name = name;
    }
    if let Some(listen) = var("SHV_LISTEN") {
        let urls: Vec<String> = listen
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if !urls.is_empty() {
            config.listen = urls;
        }
    }
}
