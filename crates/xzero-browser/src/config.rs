//! Browser configuration persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::Selectors;

pub const DEFAULT_CHAT_URL: &str = "https://web.whatsapp.com";
pub const DEFAULT_DEBUGGING_PORT: u16 = 9222;

/// Persisted browser configuration (`browser.json` in the data directory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    #[serde(default = "default_false")]
    pub headed: bool,
    /// Explicit Chrome/Chromium executable. Searched on PATH when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_binary: Option<String>,
    #[serde(default = "default_debugging_port")]
    pub debugging_port: u16,
    #[serde(default)]
    pub selectors: Selectors,
    /// Path to config file (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_false() -> bool {
    false
}
fn default_chat_url() -> String {
    DEFAULT_CHAT_URL.into()
}
fn default_debugging_port() -> u16 {
    DEFAULT_DEBUGGING_PORT
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chat_url: DEFAULT_CHAT_URL.into(),
            headed: false,
            chrome_binary: None,
            debugging_port: DEFAULT_DEBUGGING_PORT,
            selectors: Selectors::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl BrowserConfig {
    /// Load config from a JSON file, or return defaults. Environment
    /// variables override the file.
    pub fn load(config_path: &Path) -> Self {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    pub(crate) fn load_with(config_path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config: BrowserConfig = std::fs::read_to_string(config_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        config.config_path = config_path.to_path_buf();

        if let Some(url) = lookup("XZERO_CHAT_URL").filter(|v| !v.trim().is_empty()) {
            config.chat_url = url.trim().to_string();
        }
        if let Some(binary) = lookup("XZERO_CHROME").filter(|v| !v.trim().is_empty()) {
            config.chrome_binary = Some(binary.trim().to_string());
        }
        if let Some(headed) = lookup("XZERO_HEADED") {
            config.headed = matches!(headed.trim(), "1" | "true" | "yes");
        }
        config
    }

    /// Write a default `browser.json` (selectors included) for editing.
    /// Returns `false` and leaves the file alone when it already exists.
    pub fn create_if_missing(config_path: &Path) -> Result<bool, std::io::Error> {
        if config_path.exists() {
            return Ok(false);
        }
        let config = BrowserConfig {
            config_path: config_path.to_path_buf(),
            ..Default::default()
        };
        config.save()?;
        Ok(true)
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&self.config_path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BrowserConfig::load_with(&dir.path().join("browser.json"), no_env);
        assert_eq!(config.chat_url, "https://web.whatsapp.com");
        assert_eq!(config.debugging_port, 9222);
        assert!(!config.headed);
        assert_eq!(config.selectors, Selectors::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("browser.json");

        let mut config = BrowserConfig::load_with(&path, no_env);
        config.headed = true;
        config.debugging_port = 9333;
        config.selectors.chat_row_depth = 4;
        config.save().unwrap();

        let reloaded = BrowserConfig::load_with(&path, no_env);
        assert!(reloaded.headed);
        assert_eq!(reloaded.debugging_port, 9333);
        assert_eq!(reloaded.selectors.chat_row_depth, 4);
        assert_eq!(reloaded.config_path, path);
    }

    #[test]
    fn test_create_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("browser.json");

        assert!(BrowserConfig::create_if_missing(&path).unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"selectors\""));
        assert_eq!(BrowserConfig::load_with(&path, no_env).selectors, Selectors::default());

        std::fs::write(&path, r#"{"headed": true}"#).unwrap();
        assert!(!BrowserConfig::create_if_missing(&path).unwrap());
        assert!(BrowserConfig::load_with(&path, no_env).headed);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("browser.json");
        std::fs::write(&path, r#"{"chat_url": "https://from-file.example", "headed": true}"#).unwrap();

        let config = BrowserConfig::load_with(&path, |key| match key {
            "XZERO_CHAT_URL" => Some(" https://from-env.example ".into()),
            "XZERO_CHROME" => Some("/opt/chromium/chrome".into()),
            "XZERO_HEADED" => Some("0".into()),
            _ => None,
        });
        assert_eq!(config.chat_url, "https://from-env.example");
        assert_eq!(config.chrome_binary.as_deref(), Some("/opt/chromium/chrome"));
        assert!(!config.headed);
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("browser.json");
        std::fs::write(&path, "not json").unwrap();
        let config = BrowserConfig::load_with(&path, no_env);
        assert_eq!(config.chat_url, DEFAULT_CHAT_URL);
    }
}
