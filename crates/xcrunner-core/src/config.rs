//! Persistent configuration for xcrunner.
//!
//! Stores runner settings in `~/.xcrunner/config.json`. Every field has a
//! default, so a missing file, a partial file, or an unreadable one all yield
//! a usable configuration.
//!
//! # Example
//!
//! ```no_run
//! use xcrunner_core::config::RunnerConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = RunnerConfig::load();
//! println!("proxying through {}", config.network_service);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::logs::{LogError, LogRetention, RetentionPolicy, MAX_RUNNER_LOGS};
use crate::poll::PollPolicy;
use crate::proxy::DEFAULT_NETWORK_SERVICE;

const CONFIG_DIRNAME: &str = ".xcrunner";
const CONFIG_FILENAME: &str = "config.json";

/// Returns the xcrunner directory path (`~/.xcrunner/`), if a home directory exists.
pub fn xcrunner_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIRNAME))
}

/// Persistent xcrunner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Simulator to target: a UDID or `booted`.
    pub device: String,
    /// Host network service the proxy is applied to.
    pub network_service: String,
    /// Runner logs tolerated before a retention pass.
    pub max_runner_logs: usize,
    /// What the retention pass deletes.
    pub retention_policy: RetentionPolicy,
    /// Overall budget for waiting on an app to start, in milliseconds.
    pub alive_timeout_ms: u64,
    /// Delay between app liveness checks, in milliseconds.
    pub alive_delay_ms: u64,
    /// How long a single process listing may take, in milliseconds.
    pub listing_timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            device: "booted".to_string(),
            network_service: DEFAULT_NETWORK_SERVICE.to_string(),
            max_runner_logs: MAX_RUNNER_LOGS,
            retention_policy: RetentionPolicy::default(),
            alive_timeout_ms: 4000,
            alive_delay_ms: 300,
            listing_timeout_ms: 3000,
        }
    }
}

impl RunnerConfig {
    /// Default config file location, `~/.xcrunner/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        xcrunner_dir().map(|dir| dir.join(CONFIG_FILENAME))
    }

    /// Load config from `~/.xcrunner/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::default_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load config from `path`, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(json) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            Self::default()
        })
    }

    /// Save config to `~/.xcrunner/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::default_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory")
        })?;
        self.save_to(&path)
    }

    /// Save config to `path`, creating its parent directory.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Poll policy for app liveness waits.
    pub fn alive_policy(&self) -> PollPolicy {
        PollPolicy::from_millis(self.alive_timeout_ms, self.alive_delay_ms)
    }

    /// Wait bound for one process listing.
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_millis(self.listing_timeout_ms)
    }

    /// Log retention under the user log root with these settings.
    ///
    /// # Errors
    ///
    /// [`LogError::NoLogRoot`] if the user log root cannot be determined.
    pub fn retention(&self) -> Result<LogRetention, LogError> {
        Ok(LogRetention::for_user()?
            .with_max_files(self.max_runner_logs)
            .with_policy(self.retention_policy))
    }
}
