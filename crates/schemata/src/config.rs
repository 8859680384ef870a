//! Engine configuration.
//!
//! Looks for `.config/schemata.toml` in a start directory or any parent
//! directory. Every key is optional:
//!
//! ```toml
//! max_vector_dimension = 2000
//! schema_prefix = "agent_"
//! max_concurrent_migrations = 4
//! ```

use schemata_db_schema::{DEFAULT_MAX_VECTOR_DIMENSION, TypeLimits};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Location of the config file relative to a project directory.
pub const CONFIG_FILE: &str = ".config/schemata.toml";

const DEFAULT_MAX_CONCURRENT_MIGRATIONS: usize = 4;

/// Tunables for a [`Migrator`](crate::Migrator).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Largest accepted `vector(n)` dimension.
    pub max_vector_dimension: u32,
    /// Prepended to every derived schema name, e.g. `agent_`.
    pub schema_prefix: Option<String>,
    /// Upper bound on plugins migrated at once by `migrate_all`.
    pub max_concurrent_migrations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_vector_dimension: DEFAULT_MAX_VECTOR_DIMENSION,
            schema_prefix: None,
            max_concurrent_migrations: DEFAULT_MAX_CONCURRENT_MIGRATIONS,
        }
    }
}

impl EngineConfig {
    pub fn type_limits(&self) -> TypeLimits {
        TypeLimits {
            max_vector_dimension: self.max_vector_dimension,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_vector_dimension == 0 {
            return Err(ConfigError::Invalid(
                "max_vector_dimension must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_migrations == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_migrations must be at least 1".to_string(),
            ));
        }
        if let Some(prefix) = &self.schema_prefix {
            let valid = prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
                && !prefix.starts_with(|c: char| c.is_ascii_digit());
            if !valid {
                return Err(ConfigError::Invalid(format!(
                    "schema_prefix '{}' may only contain lowercase letters, digits and '_', and must not start with a digit",
                    prefix
                )));
            }
        }
        Ok(())
    }

    /// Load configuration from `.config/schemata.toml`, searching up from the
    /// current directory.
    pub fn load() -> Result<(Self, PathBuf), ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::load_from(&cwd)
    }

    /// Load configuration starting from a specific directory.
    pub fn load_from(start: &Path) -> Result<(Self, PathBuf), ConfigError> {
        let config_path = find_config_file(start)?;
        let content =
            std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config = Self::from_toml_str(&content)?;
        Ok((config, config_path))
    }

    /// Like [`EngineConfig::load_from`], but falls back to defaults when no
    /// config file exists.
    pub fn load_or_default(start: &Path) -> Result<Self, ConfigError> {
        match Self::load_from(start) {
            Ok((config, path)) => {
                tracing::debug!(path = %path.display(), "loaded engine config");
                Ok(config)
            }
            Err(ConfigError::NotFound) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }
}

/// Find `.config/schemata.toml` by searching up the directory tree.
fn find_config_file(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No `.config/schemata.toml` found in any parent directory
    NotFound,
    /// I/O error reading the file
    Io(String),
    /// The file is not valid TOML or has unknown keys
    Parse(String),
    /// The values parse but are out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound => {
                write!(
                    f,
                    "No {} found in current directory or any parent",
                    CONFIG_FILE
                )
            }
            ConfigError::Io(e) => write!(f, "Failed to read {}: {}", CONFIG_FILE, e),
            ConfigError::Parse(e) => write!(f, "Failed to parse {}: {}", CONFIG_FILE, e),
            ConfigError::Invalid(e) => write!(f, "Invalid {}: {}", CONFIG_FILE, e),
        }
    }
}

impl std::error::Error for ConfigError {}
