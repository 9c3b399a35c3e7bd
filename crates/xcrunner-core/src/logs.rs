//! Runner log directory and retention.
//!
//! Each XCTest runner launch writes its output to
//! `<user-log-dir>/maestro/xctest_runner_logs/xctest_runner_<yyyy-MM-dd_HHmmss>.log`.
//! The timestamp format makes descending name order equal descending
//! recency, which the retention pass relies on.
//!
//! The directory is resolved and rotated once per process. That state lives
//! behind a mutex: [`init_log_directory`] performs the create-and-rotate
//! sequence on first use and hands back the memoized path afterwards, and
//! [`reset_log_directory`] clears it so tests can start over.
//!
//! # Retention
//!
//! When the runner log directory holds more than `max_files` entries at
//! initialisation, [`RetentionPolicy::PurgeAll`] deletes every one of them.
//! This is the long-standing behaviour and stays the default.
//! [`RetentionPolicy::KeepNewest`] deletes only the entries beyond the newest
//! `max_files`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Directory name under the user log dir.
pub const LOG_APP_NAME: &str = "maestro";

/// Subdirectory holding XCTest runner logs.
pub const RUNNER_LOGS_DIR: &str = "xctest_runner_logs";

/// Default retention threshold.
pub const MAX_RUNNER_LOGS: usize = 5;

const LOG_FILE_PREFIX: &str = "xctest_runner_";
const LOG_FILE_EXTENSION: &str = "log";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

static LOG_DIRECTORY: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Errors from log directory setup.
#[derive(Error, Debug)]
pub enum LogError {
    /// No user log directory could be determined for this platform/user.
    #[error("could not determine the user log directory")]
    NoLogRoot,

    /// Creating or listing the log directory failed.
    #[error("log directory {path}: {source}")]
    Io {
        /// The directory being prepared.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

/// What to delete when the runner log directory is over its threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Delete every existing entry.
    #[default]
    PurgeAll,
    /// Delete everything except the newest `max_files` entries.
    KeepNewest,
}

/// Retention settings for one log root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRetention {
    root: PathBuf,
    max_files: usize,
    policy: RetentionPolicy,
}

impl LogRetention {
    /// Retention over `root` with the default threshold and policy.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_files: MAX_RUNNER_LOGS,
            policy: RetentionPolicy::default(),
        }
    }

    /// Retention over the platform's user log directory.
    ///
    /// # Errors
    ///
    /// [`LogError::NoLogRoot`] if no such directory exists for this user.
    pub fn for_user() -> Result<Self, LogError> {
        user_log_root().map(Self::new).ok_or(LogError::NoLogRoot)
    }

    /// Overrides the retention threshold.
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Overrides the retention policy.
    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The application log root (`.../maestro`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The runner log directory (`.../maestro/xctest_runner_logs`).
    pub fn runner_log_dir(&self) -> PathBuf {
        self.root.join(RUNNER_LOGS_DIR)
    }

    /// Creates the log directories and runs the retention pass.
    ///
    /// Returns the runner log directory. Safe to call repeatedly, though the
    /// process-wide entry point is [`init_log_directory`].
    ///
    /// # Errors
    ///
    /// [`LogError::Io`] if the directories cannot be created or listed.
    /// Failures to delete individual entries are logged and skipped.
    pub fn initialize(&self) -> Result<PathBuf, LogError> {
        let dir = self.runner_log_dir();
        fs::create_dir_all(&dir).map_err(|source| LogError::Io {
            path: dir.clone(),
            source,
        })?;
        self.rotate(&dir)?;
        Ok(dir)
    }

    /// Applies the retention policy to `dir`, returning the deleted paths.
    fn rotate(&self, dir: &Path) -> Result<Vec<PathBuf>, LogError> {
        let io_err = |source| LogError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = fs::read_dir(dir)
            .map_err(io_err)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;

        if entries.len() <= self.max_files {
            return Ok(Vec::new());
        }

        entries.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        let doomed = match self.policy {
            RetentionPolicy::PurgeAll => entries,
            RetentionPolicy::KeepNewest => entries.split_off(self.max_files),
        };
        info!(
            dir = %dir.display(),
            count = doomed.len(),
            policy = ?self.policy,
            "rotating runner logs"
        );

        let mut deleted = Vec::with_capacity(doomed.len());
        for path in doomed {
            match remove_entry(&path) {
                Ok(()) => deleted.push(path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete old runner log")
                }
            }
        }
        Ok(deleted)
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// The platform's user log root for the runner, e.g. `~/Library/Logs/maestro`.
///
/// Off macOS this falls back to the XDG state directory, then the cache
/// directory.
pub fn user_log_root() -> Option<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|home| home.join("Library").join("Logs"))
    } else {
        dirs::state_dir().or_else(dirs::cache_dir)
    };
    base.map(|dir| dir.join(LOG_APP_NAME))
}

/// File name for a runner log started at `at`.
///
/// ```
/// use chrono::{Local, TimeZone};
/// use xcrunner_core::logs::log_file_name;
///
/// let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
/// assert_eq!(log_file_name(&at), "xctest_runner_2024-03-09_070502.log");
/// ```
pub fn log_file_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{LOG_FILE_PREFIX}{}.{LOG_FILE_EXTENSION}",
        at.format(TIMESTAMP_FORMAT)
    )
}

// ---------------------------------------------------------------------------
// Process-wide state
// ---------------------------------------------------------------------------

/// Initialises the process-wide runner log directory from `retention`.
///
/// The first successful call creates and rotates the directory. Every later
/// call returns that same path, even when given different settings, until
/// [`reset_log_directory`] is called. Concurrent first calls are serialised;
/// exactly one performs the rotation.
///
/// # Errors
///
/// Propagates [`LogRetention::initialize`] errors; a failed attempt leaves
/// the state uninitialised.
pub fn init_log_directory(retention: &LogRetention) -> Result<PathBuf, LogError> {
    let mut state = LOG_DIRECTORY.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(dir) = state.as_ref() {
        return Ok(dir.clone());
    }
    let dir = retention.initialize()?;
    debug!(dir = %dir.display(), "runner log directory ready");
    *state = Some(dir.clone());
    Ok(dir)
}

/// Returns the process-wide runner log directory, initialising it under the
/// user log root with default retention if needed.
///
/// # Errors
///
/// [`LogError::NoLogRoot`] or [`LogError::Io`] on first initialisation.
pub fn ensure_log_directory() -> Result<PathBuf, LogError> {
    if let Some(dir) = current_log_directory() {
        return Ok(dir);
    }
    init_log_directory(&LogRetention::for_user()?)
}

/// The memoized runner log directory, if initialised.
pub fn current_log_directory() -> Option<PathBuf> {
    LOG_DIRECTORY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Forgets the memoized directory. The next initialisation rotates again.
pub fn reset_log_directory() {
    *LOG_DIRECTORY.lock().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Path for a new runner log in `dir`, stamped with the current local time.
pub fn log_file_path_in(dir: &Path) -> PathBuf {
    dir.join(log_file_name(&Local::now()))
}

/// Path for a new runner log in the process-wide log directory.
///
/// # Errors
///
/// Same as [`ensure_log_directory`].
pub fn new_log_file_path() -> Result<PathBuf, LogError> {
    ensure_log_directory().map(|dir| log_file_path_in(&dir))
}
