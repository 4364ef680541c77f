//! Service configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use quota_core::{
    check_window, LevelQuota, MembershipLevel, QuotaSchedule, DEFAULT_COOLDOWN_WINDOW_SECS,
    DEFAULT_DAILY_RESET_HOUR,
};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set to something unparseable.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
    },

    /// The quota levels file could not be read or parsed.
    #[error("quota levels file {path}: {message}")]
    LevelsFile {
        /// Path of the file.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// The assembled configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Volatile in-process storage.
    Memory,
    /// `RocksDB` under `data_dir`.
    RocksDb,
}

impl std::str::FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" | "rocks" => Ok(Self::RocksDb),
            _ => Err(()),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to the `RocksDB` data directory (default: "/data/quota-ledger").
    pub data_dir: String,

    /// Storage backend (default: `rocksdb` when compiled in, else `memory`).
    pub store_backend: StoreBackend,

    /// Time between refresh passes (default: 60 seconds).
    pub refresh_interval: Duration,

    /// Number of shards a refresh pass is split into (default: 1).
    pub refresh_shards: u32,

    /// Minimum time between two accepted flag changes, in seconds (default: 3 days).
    pub cooldown_window_seconds: i64,

    /// Hour of day (UTC) at which daily allowances refill (default: 1).
    pub daily_reset_hour: u32,

    /// Per-level capacities.
    pub quota_schedule: QuotaSchedule,
}

impl ServiceConfig {
    /// Load configuration from environment variables and the quota levels file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is malformed, the levels file named by
    /// `QUOTA_LEVELS_FILE` is unreadable, or the result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let store_backend = match lookup("STORE_BACKEND") {
            Some(value) => value.parse().map_err(|()| ConfigError::InvalidValue {
                name: "STORE_BACKEND",
                value,
            })?,
            None => defaults.store_backend,
        };

        let quota_schedule = match lookup("QUOTA_LEVELS_FILE") {
            Some(path) => load_levels_file(&path)?,
            None => load_default_levels(),
        };

        let config = Self {
            data_dir: lookup("DATA_DIR").unwrap_or(defaults.data_dir),
            store_backend,
            refresh_interval: parse_var(&lookup, "REFRESH_INTERVAL_SECONDS")?
                .map_or(defaults.refresh_interval, Duration::from_secs),
            refresh_shards: parse_var(&lookup, "REFRESH_SHARDS")?
                .unwrap_or(defaults.refresh_shards),
            cooldown_window_seconds: parse_var(&lookup, "COOLDOWN_WINDOW_SECONDS")?
                .unwrap_or(defaults.cooldown_window_seconds),
            daily_reset_hour: parse_var(&lookup, "DAILY_RESET_HOUR")?
                .unwrap_or(defaults.daily_reset_hour),
            quota_schedule,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Invalid("refresh interval must be positive".into()));
        }
        if self.refresh_shards == 0 {
            return Err(ConfigError::Invalid("refresh shards must be at least 1".into()));
        }
        if self.cooldown_window_seconds < 0 {
            return Err(ConfigError::Invalid("cooldown window must be non-negative".into()));
        }
        let window = chrono::Duration::try_seconds(self.cooldown_window_seconds).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "cooldown window out of range: {} seconds",
                self.cooldown_window_seconds
            ))
        })?;
        check_window(window, chrono::Utc::now()).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.daily_reset_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "daily reset hour must be 0-23, got {}",
                self.daily_reset_hour
            )));
        }
        self.quota_schedule
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The cooldown window as a duration.
    ///
    /// A value [`Self::validate`] would reject as out of range falls back to the
    /// default window.
    #[must_use]
    pub fn cooldown_window(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.cooldown_window_seconds)
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_COOLDOWN_WINDOW_SECS))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: "/data/quota-ledger".into(),
            store_backend: if cfg!(feature = "rocksdb-backend") {
                StoreBackend::RocksDb
            } else {
                StoreBackend::Memory
            },
            refresh_interval: Duration::from_secs(60),
            refresh_shards: 1,
            cooldown_window_seconds: DEFAULT_COOLDOWN_WINDOW_SECS,
            daily_reset_hour: DEFAULT_DAILY_RESET_HOUR,
            quota_schedule: QuotaSchedule::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}

/// Load the quota levels file from the conventional locations, if present.
fn load_default_levels() -> QuotaSchedule {
    let paths = [
        "config/quota-levels.json",
        "quota-ledger/config/quota-levels.json",
        "../config/quota-levels.json",
    ];

    for path in &paths {
        if Path::new(path).exists() {
            match load_levels_file(path) {
                Ok(schedule) => {
                    tracing::info!(path = %path, "Loaded quota levels from file");
                    return schedule;
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "Ignoring unreadable quota levels file"),
            }
        }
    }

    tracing::debug!("Quota levels file not found, using built-in defaults");
    QuotaSchedule::default()
}

/// Load per-level capacities from a JSON file.
///
/// The file maps level names to capacities; levels it omits keep their defaults:
///
/// ```json
/// { "free": { "monthly_quota": 100, "daily_limit": 10 } }
/// ```
fn load_levels_file(path: &str) -> Result<QuotaSchedule, ConfigError> {
    let to_error = |message: String| ConfigError::LevelsFile {
        path: path.to_string(),
        message,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| to_error(e.to_string()))?;
    let levels: BTreeMap<MembershipLevel, LevelQuota> =
        serde_json::from_str(&contents).map_err(|e| to_error(e.to_string()))?;

    Ok(levels
        .into_iter()
        .fold(QuotaSchedule::default(), |schedule, (level, quota)| {
            schedule.with_level(level, quota)
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ServiceConfig::from_lookup(lookup(&[("STORE_BACKEND", "memory")])).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.cooldown_window(), chrono::Duration::days(3));
        assert_eq!(config.daily_reset_hour, 1);
    }

    #[test]
    fn variables_override_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("STORE_BACKEND", "memory"),
            ("REFRESH_INTERVAL_SECONDS", "5"),
            ("REFRESH_SHARDS", "4"),
            ("COOLDOWN_WINDOW_SECONDS", "60"),
            ("DAILY_RESET_HOUR", "0"),
            ("DATA_DIR", "/tmp/quota"),
        ]))
        .unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.refresh_shards, 4);
        assert_eq!(config.cooldown_window_seconds, 60);
        assert_eq!(config.daily_reset_hour, 0);
        assert_eq!(config.data_dir, "/tmp/quota");
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[("REFRESH_SHARDS", "many")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "REFRESH_SHARDS",
                ..
            }
        ));

        let err = ServiceConfig::from_lookup(lookup(&[("DAILY_RESET_HOUR", "24")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ServiceConfig::from_lookup(lookup(&[("STORE_BACKEND", "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn out_of_range_cooldown_window_is_rejected() {
        let config = ServiceConfig {
            cooldown_window_seconds: i64::MAX,
            ..ServiceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.cooldown_window(), chrono::Duration::days(3));

        let err = ServiceConfig::from_lookup(lookup(&[
            ("STORE_BACKEND", "memory"),
            ("COOLDOWN_WINDOW_SECONDS", "9223372036854775807"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn levels_file_overrides_named_levels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "premium": {{ "monthly_quota": 42, "daily_limit": 7 }} }}"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = ServiceConfig::from_lookup(lookup(&[
            ("STORE_BACKEND", "memory"),
            ("QUOTA_LEVELS_FILE", path.as_str()),
        ]))
        .unwrap();
        assert_eq!(
            config.quota_schedule.quota_for(MembershipLevel::Premium),
            LevelQuota::new(42, 7)
        );
        assert_eq!(
            config.quota_schedule.quota_for(MembershipLevel::Free),
            QuotaSchedule::default().quota_for(MembershipLevel::Free)
        );
    }

    #[test]
    fn missing_levels_file_is_an_error() {
        let err = ServiceConfig::from_lookup(lookup(&[(
            "QUOTA_LEVELS_FILE",
            "/definitely/not/here.json",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::LevelsFile { .. }));
    }

    #[test]
    fn negative_level_quota_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "free": {{ "monthly_quota": -1, "daily_limit": 1 }} }}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let err = ServiceConfig::from_lookup(lookup(&[("QUOTA_LEVELS_FILE", path.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
