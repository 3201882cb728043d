// crates/core/src/config.rs
//! Runtime configuration.
//!
//! Loaded from TOML (every key optional, defaults below), then overridden
//! by a handful of environment variables so deployments can tweak the
//! common knobs without shipping a file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default HTTP port for the operational API.
pub const DEFAULT_PORT: u16 = 47893;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jobs: JobsConfig,
    pub sync: SyncConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. `None` means [`crate::paths::db_path`].
    pub path: Option<PathBuf>,
}

/// Scheduling for the two periodic jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// A Live session whose heartbeat is older than this is closed as abandoned.
    pub stale_threshold_secs: u64,
    pub sweep_interval_secs: u64,
    pub sync_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: 300,
            sweep_interval_secs: 60,
            sync_interval_secs: 120,
        }
    }
}

impl JobsConfig {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

/// External system-of-record push.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Endpoint receiving completed sessions. Sync is disabled when unset.
    pub endpoint: Option<String>,
    /// Static bearer token. Ignored when `auth.token_url` is set.
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    /// Attempts per session per run, including the first. At least 1.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Total push attempts allowed in one run before the rest are deferred.
    /// Values below 1 are treated as 1.
    pub attempt_budget: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            timeout_secs: 10,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            attempt_budget: 100,
        }
    }
}

impl SyncConfig {
    pub fn enabled(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Credential refresh against the external auth service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_url: Option<String>,
    pub client_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: "questline-reconciler".into(),
            access_token: None,
            refresh_token: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
    /// Also write daily-rotated log files here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
            directory: None,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|source| ConfigError::Parse {
            path: origin.to_owned(),
            source,
        })
    }

    /// Read and parse the file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_toml_str(&raw, path)
    }

    /// Load configuration the way the server binary does.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// used if present, else built-in defaults. Environment overrides are
    /// applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match crate::paths::config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("QUESTLINE_PORT")
            .map(|v| ("QUESTLINE_PORT", v))
            .or_else(|| lookup("PORT").map(|v| ("PORT", v)));
        if let Some((key, value)) = port {
            self.server.port = parse_env(key, &value)?;
        }
        if let Some(path) = lookup("QUESTLINE_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(endpoint) = lookup("QUESTLINE_SYNC_ENDPOINT") {
            self.sync.endpoint = Some(endpoint);
        }
        if let Some(token) = lookup("QUESTLINE_SYNC_TOKEN") {
            self.sync.api_token = Some(token);
        }
        if let Some(secs) = lookup("QUESTLINE_STALE_THRESHOLD_SECS") {
            self.jobs.stale_threshold_secs = parse_env("QUESTLINE_STALE_THRESHOLD_SECS", &secs)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.jobs.stale_threshold(), Duration::from_secs(300));
        assert!(!config.sync.enabled());
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [jobs]
            stale_threshold_secs = 120

            [sync]
            endpoint = "https://records.example.com/api/sessions/"
            max_attempts = 5

            [logging]
            format = "json"
            "#,
            Path::new("inline.toml"),
        )
        .unwrap();

        assert_eq!(config.jobs.stale_threshold_secs, 120);
        assert_eq!(config.jobs.sweep_interval_secs, 60);
        assert!(config.sync.enabled());
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync.initial_backoff_ms, 500);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let err = AppConfig::from_toml_str("[jobs\nbroken", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 9000\n").unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9000);

        let missing = AppConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "8081"),
            ("QUESTLINE_DB_PATH", "/var/lib/questline/db.sqlite"),
            ("QUESTLINE_SYNC_ENDPOINT", "https://records.example.com/sync"),
            ("QUESTLINE_STALE_THRESHOLD_SECS", "90"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/questline/db.sqlite"))
        );
        assert!(config.sync.enabled());
        assert_eq!(config.jobs.stale_threshold_secs, 90);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|k| (k == "QUESTLINE_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_env_error_names_the_key_that_was_read() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|k| (k == "PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        match err {
            ConfigError::InvalidEnv { key, value } => {
                assert_eq!(key, "PORT");
                assert_eq!(value, "eighty");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_endpoint_disables_sync() {
        let mut config = AppConfig::default();
        config.sync.endpoint = Some("   ".into());
        assert!(!config.sync.enabled());
    }
}
