//! Configuration: server location, credentials and polling periods

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Messages fetched per page; only page 0 is ever requested
pub const MESSAGE_PAGE_SIZE: u32 = 50;

/// Maximum message body length, in characters
pub const MESSAGE_MAX_LENGTH: usize = 1_000;

/// User search queries shorter than this never reach the server
pub const MIN_USER_SEARCH_LENGTH: usize = 3;

/// Upper bound on participants in a new conversation
pub const MAX_PARTICIPANTS: usize = 50;

/// Allowed conversation name length, in characters
pub const CONVERSATION_NAME_MIN: usize = 3;
pub const CONVERSATION_NAME_MAX: usize = 120;

/// All configurable values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub access_token: Option<String>,
    pub current_user_id: Option<i64>,
    pub unread_poll_interval_ms: u64,
    pub session_poll_interval_ms: u64,
    pub list_refresh_interval_ms: u64,
    pub message_page_size: u32,
    pub message_max_length: usize,
    pub min_user_search_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            access_token: None,
            current_user_id: None,
            unread_poll_interval_ms: 10_000,
            session_poll_interval_ms: 8_000,
            list_refresh_interval_ms: 15_000,
            message_page_size: MESSAGE_PAGE_SIZE,
            message_max_length: MESSAGE_MAX_LENGTH,
            min_user_search_length: MIN_USER_SEARCH_LENGTH,
        }
    }
}

impl Config {
    /// Create config for testing with short polling periods
    pub fn for_test() -> Self {
        Self {
            base_url: "http://127.0.0.1:9".to_string(),
            access_token: Some("test-token".to_string()),
            current_user_id: Some(1),
            unread_poll_interval_ms: 1_000,
            session_poll_interval_ms: 500,
            list_refresh_interval_ms: 2_000,
            ..Self::default()
        }
    }

    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chat-sync").join("config.json"))
    }

    /// Load from the default path (if present), then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a specific file; missing fields take their defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save atomically (temp file in the same directory, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let json = serde_json::to_string_pretty(self)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CHAT_SYNC_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(token) = std::env::var("CHAT_SYNC_TOKEN") {
            self.access_token = Some(token);
        }
        if let Ok(raw) = std::env::var("CHAT_SYNC_USER_ID") {
            let id = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("CHAT_SYNC_USER_ID is not a number: {}", raw)))?;
            self.current_user_id = Some(id);
        }
        Ok(())
    }

    pub fn unread_poll_interval(&self) -> Duration {
        Duration::from_millis(self.unread_poll_interval_ms)
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_millis(self.session_poll_interval_ms)
    }

    pub fn list_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.list_refresh_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.unread_poll_interval(), Duration::from_secs(10));
        assert_eq!(config.session_poll_interval(), Duration::from_secs(8));
        assert_ne!(config.unread_poll_interval(), config.session_poll_interval());
        assert_eq!(config.message_page_size, 50);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.json");

        let config = Config::for_test();
        config.save(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"base_url": "https://chat.example.com"}"#).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.base_url, "https://chat.example.com");
        assert_eq!(loaded.unread_poll_interval_ms, 10_000);
        assert!(loaded.access_token.is_none());
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Json(_))));
    }
}
