//! Configuration Loader
//!
//! Environment-aware loading: built-in defaults, then `base.toml`, then
//! `{environment}.toml` from the configuration directory, then
//! `CARE_PATHWAY__SECTION__KEY` environment variables. Files are optional.

use super::EngineConfig;
use crate::error::Result;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "CARE_PATHWAY";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_CONFIG_DIR: &str = "config";

#[derive(Debug)]
pub struct ConfigManager {
    config: EngineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    ///
    /// Useful in tests that must not touch process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            sla_interval_seconds = config.sla.check_interval_seconds,
            dispatcher_workers = config.dispatcher.worker_count,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: EngineConfig, environment: &str) -> Result<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from(DEFAULT_CONFIG_DIR),
        }))
    }

    fn load_and_merge_config(config_directory: &Path, environment: &str) -> Result<EngineConfig> {
        let base_file = config_directory.join("base.toml");
        let env_file = config_directory.join(format!("{environment}.toml"));

        if !base_file.exists() && !env_file.exists() {
            debug!(
                "No configuration files in {}, using defaults",
                config_directory.display()
            );
        }

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(config::File::from(base_file).required(false))
            .add_source(config::File::from(env_file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Detect environment from environment variables
    pub fn detect_environment() -> String {
        env::var("CARE_PATHWAY_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CarePathwayError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.config(), &EngineConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("base.toml"),
            "[sla]\nbatch_size = 50\ncheck_interval_seconds = 120\n",
        )
        .unwrap();
        fs::write(dir.path().join("test.toml"), "[sla]\nbatch_size = 10\n").unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.config().sla.batch_size, 10);
        assert_eq!(manager.config().sla.check_interval_seconds, 120);
        assert_eq!(manager.config().tasks.default_max_retries, 3);
    }

    #[test]
    fn test_invalid_value_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("base.toml"), "[dispatcher]\nworker_count = 0\n").unwrap();

        let err = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
            .unwrap_err();
        assert!(matches!(err, CarePathwayError::Configuration(_)));
    }
}
