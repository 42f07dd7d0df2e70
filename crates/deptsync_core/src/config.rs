//! Reconciliation service settings.
//!
//! # Responsibility
//! - Load the JSON settings file consumed by the host binary.
//! - Resolve relative paths and apply environment overrides.
//!
//! # Invariants
//! - A validated config has non-empty paths and non-zero durations.
//! - Relative paths are resolved against the settings file directory.

use crate::reconcile::TenantPolicy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default run cadence (30 minutes).
pub const DEFAULT_INTERVAL_SECS: u64 = 30 * 60;
/// Default bound on reading the feed file.
pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 30;
/// Default bound on the store phase of one run.
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 120;
/// Environment variable overriding `dataFilePath`.
pub const DATA_FILE_PATH_ENV: &str = "DEPTSYNC_DATA_FILE_PATH";

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read settings `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "invalid settings `{}`: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid settings: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

/// Settings for the scheduler, the feed and the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Feed file location. Created with `[]` when missing.
    pub data_file_path: PathBuf,
    /// SQLite directory store location.
    pub database_path: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_feed_timeout_secs")]
    pub feed_timeout_secs: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default)]
    pub tenant_policy: TenantPolicy,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_feed_timeout_secs() -> u64 {
    DEFAULT_FEED_TIMEOUT_SECS
}

fn default_store_timeout_secs() -> u64 {
    DEFAULT_STORE_TIMEOUT_SECS
}

impl SyncConfig {
    /// Builds a config with default timings for the given paths.
    pub fn new(data_file_path: impl Into<PathBuf>, database_path: impl Into<PathBuf>) -> Self {
        Self {
            data_file_path: data_file_path.into(),
            database_path: database_path.into(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            feed_timeout_secs: DEFAULT_FEED_TIMEOUT_SECS,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            tenant_policy: TenantPolicy::default(),
            log_level: None,
            log_dir: None,
        }
    }

    /// Reads, resolves, overrides from the process environment, and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Rewrites relative paths so they are anchored at `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for path in [
            Some(&mut self.data_file_path),
            Some(&mut self.database_path),
            self.log_dir.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() && !path.as_os_str().is_empty() {
                *path = base.join(&*path);
            }
        }
    }

    /// Applies overrides from `lookup` (the process environment in `load`).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(DATA_FILE_PATH_ENV).filter(|value| !value.trim().is_empty()) {
            self.data_file_path = PathBuf::from(value.trim());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_file_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("dataFilePath cannot be empty".to_string()));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("databasePath cannot be empty".to_string()));
        }
        for (name, value) in [
            ("intervalSecs", self.interval_secs),
            ("feedTimeoutSecs", self.feed_timeout_secs),
            ("storeTimeoutSecs", self.store_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, SyncConfig, DATA_FILE_PATH_ENV, DEFAULT_INTERVAL_SECS};
    use crate::reconcile::TenantPolicy;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    #[test]
    fn minimal_settings_use_defaults() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"dataFilePath":"employees.json","databasePath":"directory.db"}"#,
        )
        .expect("minimal settings should parse");

        assert_eq!(config.interval_secs, DEFAULT_INTERVAL_SECS);
        assert_eq!(config.interval(), Duration::from_secs(1800));
        assert_eq!(config.tenant_policy, TenantPolicy::Permit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tenant_policy_parses_snake_case() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"dataFilePath":"a.json","databasePath":"b.db","tenantPolicy":"same_tenant"}"#,
        )
        .expect("settings should parse");
        assert_eq!(config.tenant_policy, TenantPolicy::SameTenant);
    }

    #[test]
    fn relative_paths_resolve_against_settings_directory() {
        let mut config = SyncConfig::new("feeds/employees.json", "/var/lib/directory.db");
        config.log_dir = Some(PathBuf::from("logs"));
        config.resolve_relative_to(Path::new("/etc/deptsync"));

        assert_eq!(
            config.data_file_path,
            PathBuf::from("/etc/deptsync/feeds/employees.json")
        );
        assert_eq!(config.database_path, PathBuf::from("/var/lib/directory.db"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/etc/deptsync/logs")));
    }

    #[test]
    fn env_override_replaces_feed_path() {
        let mut config = SyncConfig::new("employees.json", "directory.db");
        config.apply_env_overrides(|key| {
            (key == DATA_FILE_PATH_ENV).then(|| "/srv/feed.json".to_string())
        });
        assert_eq!(config.data_file_path, PathBuf::from("/srv/feed.json"));

        config.apply_env_overrides(|_| Some("   ".to_string()));
        assert_eq!(config.data_file_path, PathBuf::from("/srv/feed.json"));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = SyncConfig::new("employees.json", "directory.db");
        config.interval_secs = 0;
        let err = config.validate().expect_err("zero interval must fail");
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("intervalSecs")));
    }

    #[test]
    fn load_reports_missing_file_and_bad_json() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = config_err(SyncConfig::load(dir.path().join("absent.json")));
        assert!(matches!(missing, ConfigError::Io { .. }));

        let bad_path = dir.path().join("settings.json");
        std::fs::write(&bad_path, "{").expect("write settings");
        let bad = config_err(SyncConfig::load(&bad_path));
        assert!(matches!(bad, ConfigError::Parse { .. }));
    }

    fn config_err(result: Result<SyncConfig, ConfigError>) -> ConfigError {
        match result {
            Ok(config) => panic!("expected settings error, got {config:?}"),
            Err(err) => err,
        }
    }
}
