/// Configuration for the parent feed
///
/// Stored at: `$USER_HOME/.parent-feed/config.json`
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FeedError;

/// Feed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// SQLite file holding read flags and feed snapshots
    pub database_path: String,

    /// Base URL of the hosted backend, e.g. `https://school.example.co`
    pub backend_url: Option<String>,

    /// Public API key sent with every REST request
    pub api_key: Option<String>,

    /// Signed-in user's access token; falls back to `api_key`
    pub access_token: Option<String>,

    /// Upper bound on resolving the authorized children before subscribing
    pub scope_timeout_secs: u64,

    /// Rows fetched per source during a refresh
    pub refresh_limit: usize,

    /// Buffered events per in-process subscription
    pub event_buffer: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        let database_path = dirs::home_dir()
            .map(|home| home.join(".parent-feed").join("feed.db"))
            .unwrap_or_else(|| PathBuf::from("feed.db"));
        Self {
            database_path: database_path.to_string_lossy().to_string(),
            backend_url: None,
            api_key: None,
            access_token: None,
            scope_timeout_secs: 10,
            refresh_limit: 50,
            event_buffer: 64,
        }
    }
}

impl FeedConfig {
    pub fn scope_timeout(&self) -> Duration {
        Duration::from_secs(self.scope_timeout_secs)
    }
}

/// Get the path to the config file
///
/// Returns: `$USER_HOME/.parent-feed/config.json`
/// Respects `PARENT_FEED_CONFIG_PATH` environment variable for testing.
fn get_config_path() -> Result<PathBuf, FeedError> {
    if let Ok(test_path) = std::env::var("PARENT_FEED_CONFIG_PATH") {
        return Ok(PathBuf::from(test_path));
    }

    let home_dir = dirs::home_dir()
        .ok_or_else(|| FeedError::Config("Failed to get user home directory".to_string()))?;
    Ok(home_dir.join(".parent-feed").join("config.json"))
}

/// Load configuration from disk
///
/// If the config file doesn't exist, creates a new one with default values.
/// Missing fields take their defaults.
pub fn load_config() -> Result<FeedConfig, FeedError> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .map_err(|e| FeedError::Config(format!("Failed to read config file: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| FeedError::Config(format!("Failed to parse config file: {}", e)))
    } else {
        let config = FeedConfig::default();
        save_config(&config)?;
        Ok(config)
    }
}

/// Save configuration to disk
///
/// Creates the parent directory if it doesn't exist.
pub fn save_config(config: &FeedConfig) -> Result<(), FeedError> {
    let config_path = get_config_path()?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| FeedError::Config(format!("Failed to create config directory: {}", e)))?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(&config_path, content)
        .map_err(|e| FeedError::Config(format!("Failed to write config file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    // Helper to override config path for testing
    fn with_temp_config<F>(f: F)
    where
        F: FnOnce(&TempDir),
    {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.json");

        unsafe {
            std::env::set_var("PARENT_FEED_CONFIG_PATH", config_path.to_str().unwrap());
        }

        f(&temp_dir);

        unsafe {
            std::env::remove_var("PARENT_FEED_CONFIG_PATH");
        }
    }

    #[test]
    fn test_get_config_path() {
        with_temp_config(|temp_dir| {
            let path = get_config_path().expect("Failed to get config path");
            assert_eq!(path, temp_dir.path().join("config.json"));
        });
    }

    #[test]
    fn test_load_creates_defaults() {
        with_temp_config(|temp_dir| {
            let config = load_config().expect("Failed to load config");
            assert_eq!(config.scope_timeout_secs, 10);
            assert_eq!(config.refresh_limit, 50);
            assert!(temp_dir.path().join("config.json").exists());
        });
    }

    #[test]
    fn test_save_and_load_config() {
        with_temp_config(|_| {
            let original = FeedConfig {
                backend_url: Some("https://school.example.co".to_string()),
                api_key: Some("anon".to_string()),
                scope_timeout_secs: 3,
                ..FeedConfig::default()
            };
            save_config(&original).unwrap();

            let loaded = load_config().unwrap();
            assert_eq!(loaded, original);
            assert_eq!(loaded.scope_timeout(), Duration::from_secs(3));
        });
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        with_temp_config(|temp_dir| {
            fs::write(
                temp_dir.path().join("config.json"),
                r#"{ "refresh_limit": 5 }"#,
            )
            .unwrap();

            let loaded = load_config().unwrap();
            assert_eq!(loaded.refresh_limit, 5);
            assert_eq!(loaded.event_buffer, 64);
        });
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        with_temp_config(|temp_dir| {
            fs::write(temp_dir.path().join("config.json"), "{ nope").unwrap();
            assert!(matches!(load_config(), Err(FeedError::Config(_))));
        });
    }
}
