//! Runner configuration.
//!
//! Loaded via the `config` crate from `NODEFLOW_`-prefixed environment
//! variables. Nested keys use `__`, so `NODEFLOW_ENGINE__MAX_CONCURRENCY=4`
//! sets [`EngineConfig::max_concurrency`].

use nodeflow_workflow::EngineConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NODEFLOW";

/// Runner configuration composed from the engine config.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Path of the workflow definition to run.
    pub workflow_path: PathBuf,

    /// Directory receiving `<run id>.json` records. No record is written
    /// when unset.
    #[serde(default)]
    pub record_dir: Option<PathBuf>,

    /// Engine limits and defaults.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl RunnerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(None)
    }

    /// Loads configuration from `vars` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, config::ConfigError> {
        Self::load(Some(vars))
    }

    fn load(vars: Option<HashMap<String, String>>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()
    }
}
