//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/quire/config.toml)
//! 3. Environment variables (QUIRE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "QUIRE";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite mirror)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the remote record store (optional)
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Whether sync is enabled
    #[serde(default)]
    pub sync_enabled: bool,

    /// Debounce window applied to pushes triggered by local edits
    #[serde(default = "default_push_debounce_ms")]
    pub push_debounce_ms: u64,

    /// Records requested per remote page during pull
    #[serde(default = "default_pull_page_size")]
    pub pull_page_size: usize,

    /// Maximum dirty rows uploaded per push
    #[serde(default = "default_push_batch_size")]
    pub push_batch_size: usize,

    /// Maximum dirty blocks recomputed per index run
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,

    /// First retry delay after a transient remote failure
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Upper bound for the retry delay
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Consecutive automatic retries before waiting for the next trigger
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Log file path (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote_url: None,
            sync_enabled: false,
            push_debounce_ms: default_push_debounce_ms(),
            pull_page_size: default_pull_page_size(),
            push_batch_size: default_push_batch_size(),
            index_batch_size: default_index_batch_size(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (QUIRE_DATA_DIR, QUIRE_REMOTE_URL, ...)
    /// 2. Config file (~/.config/quire/config.toml or QUIRE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration with an explicit path taking priority over QUIRE_CONFIG
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_REMOTE_URL", ENV_PREFIX)) {
            self.remote_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_SYNC_ENABLED", ENV_PREFIX)) {
            self.sync_enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }

        if let Some(val) = env_number(&format!("{}_PUSH_DEBOUNCE_MS", ENV_PREFIX)) {
            self.push_debounce_ms = val;
        }

        if let Some(val) = env_number(&format!("{}_INDEX_BATCH_SIZE", ENV_PREFIX)) {
            self.index_batch_size = val;
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() { None } else { Some(val.into()) };
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to a file
    pub fn save_to(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with QUIRE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quire")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("quire.db")
    }

    /// Debounce window as a duration
    pub fn push_debounce(&self) -> Duration {
        Duration::from_millis(self.push_debounce_ms)
    }

    /// Initial retry delay as a duration
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    /// Retry delay cap as a duration
    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quire")
}

fn default_push_debounce_ms() -> u64 {
    1500
}

fn default_pull_page_size() -> usize {
    200
}

fn default_push_batch_size() -> usize {
    500
}

fn default_index_batch_size() -> usize {
    2000
}

fn default_retry_initial_ms() -> u64 {
    1000
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_retry_max_attempts() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "QUIRE_DATA_DIR",
        "QUIRE_REMOTE_URL",
        "QUIRE_SYNC_ENABLED",
        "QUIRE_PUSH_DEBOUNCE_MS",
        "QUIRE_INDEX_BATCH_SIZE",
        "QUIRE_LOG_FILE",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.sync_enabled);
        assert!(config.remote_url.is_none());
        assert!(config.data_dir.ends_with("quire"));
        assert_eq!(config.push_debounce(), Duration::from_millis(1500));
        assert_eq!(config.index_batch_size, 2000);
        assert_eq!(config.retry_max(), Duration::from_secs(30));
    }

    #[test]
    fn test_sqlite_path() {
        let config = Config::default();
        assert!(config.sqlite_path().ends_with("quire.db"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("QUIRE_DATA_DIR", "/tmp/quire-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/quire-test"));
    }

    #[test]
    fn test_env_override_sync_enabled() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("QUIRE_SYNC_ENABLED", "true");
        config.apply_env_overrides();
        assert!(config.sync_enabled);

        env::set_var("QUIRE_SYNC_ENABLED", "false");
        config.apply_env_overrides();
        assert!(!config.sync_enabled);
    }

    #[test]
    fn test_env_override_remote_url_and_numbers() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("QUIRE_REMOTE_URL", "https://records.example.com");
        env::set_var("QUIRE_PUSH_DEBOUNCE_MS", "250");
        env::set_var("QUIRE_INDEX_BATCH_SIZE", "not-a-number");
        config.apply_env_overrides();

        assert_eq!(
            config.remote_url.as_deref(),
            Some("https://records.example.com")
        );
        assert_eq!(config.push_debounce_ms, 250);
        // Unparseable values leave the previous setting alone
        assert_eq!(config.index_batch_size, 2000);

        env::set_var("QUIRE_REMOTE_URL", "");
        config.apply_env_overrides();
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_load_from_str_partial() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            remote_url = "https://records.example.com"
            sync_enabled = true
            pull_page_size = 50
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.pull_page_size, 50);
        assert!(config.sync_enabled);
        // Missing keys fall back to defaults
        assert_eq!(config.push_batch_size, 500);
        assert_eq!(config.retry_max_attempts, 5);
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config {
            data_dir: dir.path().join("data"),
            remote_url: Some("http://localhost:8080".to_string()),
            sync_enabled: true,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.remote_url, config.remote_url);
        assert!(loaded.data_dir.exists());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::TempDir::new().unwrap();
        env::set_var("QUIRE_DATA_DIR", dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(!config.sync_enabled);
        assert!(config.remote_url.is_none());
    }
}
