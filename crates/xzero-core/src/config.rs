//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Delay between two polling passes over the chat surface.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long to wait for the logged-in marker before giving up.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Paths to all Xzero data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Persistent browser profile, keeps the login between runs (`data/browser-profile/`).
    pub browser_profile: PathBuf,
    /// Transient audio files, inbound voice notes and synthesized replies (`data/audio/`).
    pub audio: PathBuf,
    /// LLM configuration (`data/llm-config.json`).
    pub llm_config_file: PathBuf,
    /// Browser and selector configuration (`data/browser.json`).
    pub browser_config_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            browser_profile: root.join("browser-profile"),
            audio: root.join("audio"),
            llm_config_file: root.join("llm-config.json"),
            browser_config_file: root.join("browser.json"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.browser_profile)?;
        std::fs::create_dir_all(&self.audio)?;
        Ok(())
    }
}

/// Top-level Xzero runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XzeroConfig {
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Fixed delay between polling passes.
    pub poll_interval: Duration,
    /// Upper bound on the login wait.
    pub login_timeout: Duration,
}

impl XzeroConfig {
    /// Create configuration with defaults for the given data directory.
    pub fn new(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            data_paths: DataPaths::new(data_dir)?,
            poll_interval: DEFAULT_POLL_INTERVAL,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        })
    }

    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut config = Self::new(data_dir)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `XZERO_*` overrides from a key lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ms) = lookup("XZERO_POLL_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = lookup("XZERO_LOGIN_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
        {
            self.login_timeout = Duration::from_secs(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_data_paths_created() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path()).unwrap();
        assert!(paths.browser_profile.is_dir());
        assert!(paths.audio.is_dir());
        assert_eq!(paths.llm_config_file, dir.path().join("llm-config.json"));
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = XzeroConfig::new(dir.path()).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.login_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = XzeroConfig::new(dir.path()).unwrap();
        let env: HashMap<&str, &str> = [
            ("XZERO_POLL_INTERVAL_MS", "250"),
            ("XZERO_LOGIN_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        // Bad value leaves the default in place
        assert_eq!(config.login_timeout, Duration::from_secs(30));
    }
}
