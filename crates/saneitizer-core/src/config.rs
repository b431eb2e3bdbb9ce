//! Configuration (saneitizer.toml).
//!
//! Every section is optional; missing keys take their defaults. Lookup order
//! for the file itself is an explicit path, then `$SANEITIZER_CONFIG`, then
//! `<config dir>/saneitizer/saneitizer.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::assignment::ClusterConfig;
use crate::checker::CheckerConfig;
use crate::error::ConfigError;
use crate::index_layout::{DEFAULT_WIKI_ID, IndexLayoutConfig};
use crate::logging::{LogConfig, LogLevel};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "SANEITIZER_CONFIG";

/// Largest batch a single check may cover.
pub const MAX_BATCH_SIZE: usize = 5000;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Scan pacing (`[profile]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Pages checked per batch.
    pub batch_size: usize,
    /// Pause when more jobs than this are waiting. `None` never pauses.
    pub max_pressure: Option<usize>,
    /// Pause once a run has lasted this many seconds. `None` never pauses.
    pub max_time_secs: Option<u64>,
    /// Rebuild every document once per this many loops. 0 disables.
    pub old_document_cycles: u64,
    /// Number of completed loops over the id space.
    pub loop_id: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_pressure: None,
            max_time_secs: None,
            old_document_cycles: 0,
            loop_id: 0,
        }
    }
}

/// `[checker]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerSection {
    #[serde(flatten)]
    pub checker: CheckerConfig,
    /// Level used by the log-only remediator.
    pub log_only_level: LogLevel,
}

impl Default for CheckerSection {
    fn default() -> Self {
        Self {
            checker: CheckerConfig::default(),
            log_only_level: LogLevel::Info,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SaneitizerConfig {
    pub log: LogConfig,
    pub index: IndexLayoutConfig,
    pub clusters: ClusterConfig,
    pub profile: ProfileConfig,
    pub checker: CheckerSection,
}

impl SaneitizerConfig {
    /// Load and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load the resolved config file, or defaults when there is none.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match resolve_config_path(None) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(raw)?;
        config.unify_wiki_id();
        config.validate()?;
        Ok(config)
    }

    /// `[index]` and `[clusters]` both name the wiki. Whichever section
    /// sets it fills in the other.
    fn unify_wiki_id(&mut self) {
        if self.index.wiki_id == DEFAULT_WIKI_ID {
            self.index.wiki_id.clone_from(&self.clusters.wiki_id);
        } else if self.clusters.wiki_id == DEFAULT_WIKI_ID {
            self.clusters.wiki_id.clone_from(&self.index.wiki_id);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_batch_size(self.profile.batch_size)?;
        if self.index.wiki_id.is_empty() {
            return Err(ConfigError::Invalid("index.wiki_id must not be empty".to_string()));
        }
        if self.index.wiki_id != self.clusters.wiki_id {
            return Err(ConfigError::Invalid(format!(
                "index.wiki_id ({}) and clusters.wiki_id ({}) name different wikis",
                self.index.wiki_id, self.clusters.wiki_id
            )));
        }
        if self.profile.max_pressure == Some(0) {
            return Err(ConfigError::Invalid(
                "profile.max_pressure must be > 0".to_string(),
            ));
        }
        if self.profile.max_time_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "profile.max_time_secs must be > 0".to_string(),
            ));
        }
        if self.clusters.clusters.is_empty() {
            return Err(ConfigError::Invalid(
                "clusters.clusters must define at least one cluster".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn validate_batch_size(batch_size: usize) -> Result<(), ConfigError> {
    if batch_size == 0 {
        return Err(ConfigError::Invalid("batch size must be > 0".to_string()));
    }
    if batch_size > MAX_BATCH_SIZE {
        return Err(ConfigError::Invalid(format!(
            "batch size {batch_size} too high (max {MAX_BATCH_SIZE})"
        )));
    }
    Ok(())
}

/// Find the config file to use, if any exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    let default = dirs::config_dir()?.join("saneitizer").join("saneitizer.toml");
    default.exists().then_some(default)
}
