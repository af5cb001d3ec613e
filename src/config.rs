//! Runtime configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! `RADLEARN_*` environment variables override file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analytics::DEFAULT_RECENT_INTERVENTIONS;
use crate::error::{RadResult, ValidationError};
use crate::rules::MiningConfig;
use crate::storage::StorageError;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "RADLEARN_";

fn default_min_support() -> usize {
    2
}

fn default_recent_interventions() -> usize {
    DEFAULT_RECENT_INTERVENTIONS
}

fn default_log_path() -> PathBuf {
    PathBuf::from("outputs/feedback_logs.json")
}

fn default_true() -> bool {
    true
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadConfig {
    /// Observations before a mined rule is surfaced
    #[serde(default = "default_min_support")]
    pub min_support: usize,

    /// Interventions listed in analytics
    #[serde(default = "default_recent_interventions")]
    pub recent_interventions_limit: usize,

    /// Feedback log file
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Synonym table JSON; built-in chest X-ray table when unset
    #[serde(default)]
    pub synonyms_path: Option<PathBuf>,

    /// fsync the log on every append
    #[serde(default = "default_true")]
    pub sync_on_write: bool,

    /// Pretty-print the log file
    #[serde(default = "default_true")]
    pub pretty_log: bool,
}

impl Default for RadConfig {
    fn default() -> Self {
        Self {
            min_support: default_min_support(),
            recent_interventions_limit: default_recent_interventions(),
            log_path: default_log_path(),
            synonyms_path: None,
            sync_on_write: true,
            pretty_log: true,
        }
    }
}

impl RadConfig {
    /// Parses and validates TOML.
    ///
    /// # Errors
    /// `ValidationError::InvalidConfig` on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> RadResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a file, applies `RADLEARN_*` overrides and validates.
    ///
    /// # Errors
    /// - `StorageError::Io` if the file cannot be read
    /// - `ValidationError::InvalidConfig` on malformed TOML or invalid values
    pub fn load(path: impl AsRef<Path>) -> RadResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Io(format!("{}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&text).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("{}: {e}", path.display()),
        })?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus `RADLEARN_*` overrides.
    ///
    /// # Errors
    /// `ValidationError::InvalidConfig` if an override is unparseable or invalid.
    pub fn from_env() -> RadResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, keyed by full variable name
    /// (e.g. `RADLEARN_MIN_SUPPORT`).
    ///
    /// # Errors
    /// `ValidationError::InvalidConfig` if a value does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("MIN_SUPPORT") {
            self.min_support = parse_override("MIN_SUPPORT", &v)?;
        }
        if let Some(v) = get("RECENT_INTERVENTIONS_LIMIT") {
            self.recent_interventions_limit = parse_override("RECENT_INTERVENTIONS_LIMIT", &v)?;
        }
        if let Some(v) = get("LOG_PATH") {
            self.log_path = PathBuf::from(v);
        }
        if let Some(v) = get("SYNONYMS_PATH") {
            self.synonyms_path = (!v.trim().is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = get("SYNC_ON_WRITE") {
            self.sync_on_write = parse_override("SYNC_ON_WRITE", &v)?;
        }
        Ok(())
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// `ValidationError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| Err(ValidationError::InvalidConfig { reason });

        if self.min_support == 0 {
            return invalid("min_support must be at least 1".to_string());
        }
        if self.recent_interventions_limit == 0 {
            return invalid("recent_interventions_limit must be at least 1".to_string());
        }
        if self.log_path.as_os_str().is_empty() {
            return invalid("log_path must not be empty".to_string());
        }
        Ok(())
    }

    /// Miner settings.
    #[must_use]
    pub fn mining(&self) -> MiningConfig {
        MiningConfig::with_min_support(self.min_support)
    }

    /// Persistent store settings.
    #[cfg(feature = "persistent")]
    #[must_use]
    pub fn persistent(&self) -> crate::storage::PersistentConfig {
        crate::storage::PersistentConfig {
            sync_on_write: self.sync_on_write,
            pretty: self.pretty_log,
        }
    }
}

fn parse_override<T>(name: &str, value: &str) -> Result<T, ValidationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ValidationError::InvalidConfig {
            reason: format!("{ENV_PREFIX}{name}={value}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(RadConfig::from_toml_str("").unwrap(), RadConfig::default());
    }

    #[test]
    fn test_toml_fields() {
        let config = RadConfig::from_toml_str(
            r#"
            min_support = 3
            log_path = "/var/lib/radlearn/log.json"
            synonyms_path = "synonyms.json"
            sync_on_write = false
            "#,
        )
        .unwrap();
        assert_eq!(config.min_support, 3);
        assert_eq!(config.mining().min_support, 3);
        assert_eq!(config.log_path, PathBuf::from("/var/lib/radlearn/log.json"));
        assert_eq!(config.synonyms_path, Some(PathBuf::from("synonyms.json")));
        assert!(!config.sync_on_write);
        assert_eq!(config.recent_interventions_limit, 10);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RadConfig::from_toml_str("min_support = 0").unwrap_err();
        assert!(err.is_validation());
        assert!(RadConfig::from_toml_str("recent_interventions_limit = 0").is_err());
        assert!(RadConfig::from_toml_str("min_support = \"two\"").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RADLEARN_MIN_SUPPORT", "5"),
            ("RADLEARN_LOG_PATH", "/tmp/feedback.json"),
            ("RADLEARN_SYNONYMS_PATH", ""),
            ("UNRELATED", "x"),
        ]
        .into_iter()
        .collect();

        let mut config = RadConfig {
            synonyms_path: Some(PathBuf::from("old.json")),
            ..RadConfig::default()
        };
        config
            .apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.min_support, 5);
        assert_eq!(config.log_path, PathBuf::from("/tmp/feedback.json"));
        assert_eq!(config.synonyms_path, None);
    }

    #[test]
    fn test_bad_override() {
        let mut config = RadConfig::default();
        let err = config
            .apply_overrides(|k| (k == "RADLEARN_SYNC_ON_WRITE").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RADLEARN_SYNC_ON_WRITE"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radlearn.toml");
        std::fs::write(&path, "recent_interventions_limit = 4\n").unwrap();
        let config = RadConfig::load(&path).unwrap();
        assert_eq!(config.recent_interventions_limit, 4);

        let missing = RadConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.is_storage());
    }
}
