//! YAML loading for engine configuration.

use std::path::Path;

use super::error::ConfigError;
use super::types::EngineConfig;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load engine configuration from a file.
    pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse_engine_config(&content)
    }

    /// Parse engine configuration from a YAML string.
    ///
    /// Missing fields take their defaults. The result is validated.
    pub fn parse_engine_config(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}

impl EngineConfig {
    /// Shorthand for [`YamlLoader::parse_engine_config`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        YamlLoader::parse_engine_config(yaml)
    }

    /// Shorthand for [`YamlLoader::load_engine_config`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        YamlLoader::load_engine_config(path)
    }
}
