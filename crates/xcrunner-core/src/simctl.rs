//! Interface to Apple's `xcrun simctl` and `xcodebuild` for XCTest runs.
//!
//! [`Simctl`] is the entry point the test orchestration layer uses: it lists
//! installed and running apps, waits for an app to come up, uninstalls apps,
//! captures screenshots, and launches a pre-built XCTest runner in the
//! background. Every tool invocation goes through a
//! [`CommandRunner`](crate::command::CommandRunner), so the whole surface can
//! be exercised against a scripted runner.
//!
//! # Requirements
//!
//! Xcode must be installed for `xcrun simctl` and `xcodebuild` to be
//! available; `listapps` output is converted with `plutil`.
//!
//! # Example
//!
//! ```no_run
//! use xcrunner_core::simctl::Simctl;
//!
//! let simctl = Simctl::system();
//! if simctl.ensure_app_alive("com.example.shop")? {
//!     println!("pid: {:?}", simctl.pid_for_app("com.example.shop")?);
//! }
//! # Ok::<(), xcrunner_core::simctl::SimctlError>(())
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::command::{
    CommandOutput, CommandRunner, CommandSpec, DetachedProcess, ExecError, SystemRunner,
};
use crate::config::RunnerConfig;
use crate::launchctl::{parse_installed_apps, parse_running_apps};
use crate::logs::{self, LogError, LogRetention};
use crate::poll::{try_retry_until_true, try_retry_until_true_async, PollPolicy};

/// Device selector meaning "whichever simulator is booted".
pub const BOOTED: &str = "booted";

const DEFAULT_LISTING_TIMEOUT: Duration = Duration::from_millis(3000);

/// Errors that can occur when interacting with simctl.
#[derive(Error, Debug)]
pub enum SimctlError {
    /// The underlying tool could not be launched.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// A simctl command ran but reported failure.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// Failed to parse JSON output from simctl.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The runner log directory could not be prepared.
    #[error(transparent)]
    Logs(#[from] LogError),

    /// An I/O error occurred outside the spawned command.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Simulator operations over a [`CommandRunner`].
#[derive(Clone)]
pub struct Simctl {
    runner: Arc<dyn CommandRunner>,
    device: String,
    alive_policy: PollPolicy,
    listing_timeout: Duration,
    retention: Option<LogRetention>,
}

impl Simctl {
    /// Targets the booted simulator through `runner` with default settings.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            device: BOOTED.to_string(),
            alive_policy: PollPolicy::APP_ALIVE,
            listing_timeout: DEFAULT_LISTING_TIMEOUT,
            retention: None,
        }
    }

    /// Targets the booted simulator using real processes.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemRunner))
    }

    /// Applies device, timing, and retention settings from `config`.
    ///
    /// If the user log root cannot be resolved, retention is left at its
    /// default and the error surfaces on the first runner launch instead.
    pub fn with_config(self, config: &RunnerConfig) -> Self {
        let simctl = self
            .with_device(config.device.clone())
            .with_alive_policy(config.alive_policy())
            .with_listing_timeout(config.listing_timeout());
        match config.retention() {
            Ok(retention) => simctl.with_retention(retention),
            Err(_) => simctl,
        }
    }

    /// Targets a specific simulator UDID (or [`BOOTED`]).
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Overrides the poll policy used by [`ensure_app_alive`](Self::ensure_app_alive).
    pub fn with_alive_policy(mut self, policy: PollPolicy) -> Self {
        self.alive_policy = policy;
        self
    }

    /// Overrides the wait bound for a single process listing.
    pub fn with_listing_timeout(mut self, timeout: Duration) -> Self {
        self.listing_timeout = timeout;
        self
    }

    /// Uses `retention` when the runner log directory is first initialised.
    pub fn with_retention(mut self, retention: LogRetention) -> Self {
        self.retention = Some(retention);
        self
    }

    /// The simulator this instance targets.
    pub fn device(&self) -> &str {
        &self.device
    }

    fn run_sync(&self, spec: CommandSpec) -> Result<CommandOutput, SimctlError> {
        Ok(self.runner.run(&spec)?.into_output()?)
    }

    // -----------------------------------------------------------------------
    // App queries
    // -----------------------------------------------------------------------

    /// Lists bundle identifiers installed on the simulator.
    ///
    /// Runs `xcrun simctl listapps <device> | plutil -convert json - -o -`
    /// and reads its standard output only, so warnings on stderr never reach
    /// the decoder. An empty response (such as when no simulator is booted)
    /// means no apps.
    ///
    /// # Errors
    ///
    /// - [`SimctlError::Exec`] if `bash` cannot be launched
    /// - [`SimctlError::CommandFailed`] if the pipeline fails with output
    /// - [`SimctlError::JsonParse`] if the output is not a JSON object
    pub fn list_installed_apps(&self) -> Result<BTreeSet<String>, SimctlError> {
        let pipeline = format!(
            "xcrun simctl listapps {} | plutil -convert json - -o -",
            shell_quote(&self.device)
        );
        let spec = CommandSpec::sync(["bash", "-c", pipeline.as_str()]).discard_stderr();
        let output = self.run_sync(spec)?;

        if output.output.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        if !output.success() {
            return Err(SimctlError::CommandFailed(output.output));
        }
        Ok(parse_installed_apps(&output.output)?)
    }

    /// Returns the running launchd jobs keyed by normalized identifier.
    ///
    /// Runs `xcrun simctl spawn <device> launchctl list`, waiting at most the
    /// listing timeout. Output captured before a timeout is still parsed.
    ///
    /// # Errors
    ///
    /// [`SimctlError::Exec`] if `xcrun` cannot be launched.
    pub fn running_apps(&self) -> Result<HashMap<String, Option<u32>>, SimctlError> {
        let spec = CommandSpec::sync([
            "xcrun",
            "simctl",
            "spawn",
            self.device.as_str(),
            "launchctl",
            "list",
        ])
        .with_timeout(self.listing_timeout);
        let output = self.run_sync(spec)?;
        if output.timed_out {
            debug!(device = %self.device, "launchctl listing timed out; parsing partial output");
        }
        Ok(parse_running_apps(&output.output))
    }

    /// Whether `bundle_id` currently appears in the process listing.
    ///
    /// # Errors
    ///
    /// Same as [`running_apps`](Self::running_apps).
    pub fn is_app_alive(&self, bundle_id: &str) -> Result<bool, SimctlError> {
        Ok(self.running_apps()?.contains_key(bundle_id))
    }

    /// Process id of `bundle_id`, if it is listed with one.
    ///
    /// # Errors
    ///
    /// Same as [`running_apps`](Self::running_apps).
    pub fn pid_for_app(&self, bundle_id: &str) -> Result<Option<u32>, SimctlError> {
        Ok(self.running_apps()?.get(bundle_id).copied().flatten())
    }

    /// Polls until `bundle_id` is listed or the alive policy runs out.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// The first listing error ends the poll and is returned as is.
    pub fn ensure_app_alive(&self, bundle_id: &str) -> Result<bool, SimctlError> {
        let policy = self.alive_policy;
        try_retry_until_true(policy.timeout, policy.delay, || self.is_app_alive(bundle_id))
    }

    /// Async form of [`ensure_app_alive`](Self::ensure_app_alive).
    ///
    /// Each listing runs on tokio's blocking pool; the waits between attempts
    /// use tokio's timer.
    ///
    /// # Errors
    ///
    /// As for [`ensure_app_alive`](Self::ensure_app_alive).
    pub async fn ensure_app_alive_async(&self, bundle_id: &str) -> Result<bool, SimctlError> {
        let policy = self.alive_policy;
        try_retry_until_true_async(policy.timeout, policy.delay, || {
            let simctl = self.clone();
            let bundle_id = bundle_id.to_string();
            async move {
                tokio::task::spawn_blocking(move || simctl.is_app_alive(&bundle_id))
                    .await
                    .map_err(|e| SimctlError::Io(std::io::Error::other(e)))?
            }
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Device operations
    // -----------------------------------------------------------------------

    /// Uninstalls `bundle_id` from the simulator.
    ///
    /// Returns whether simctl reported success; uninstalling an app that is
    /// not installed is not treated as an error here.
    ///
    /// # Errors
    ///
    /// [`SimctlError::Exec`] if `xcrun` cannot be launched.
    pub fn uninstall(&self, bundle_id: &str) -> Result<bool, SimctlError> {
        let output = self.run_sync(CommandSpec::sync([
            "xcrun",
            "simctl",
            "uninstall",
            self.device.as_str(),
            bundle_id,
        ]))?;
        if !output.success() {
            debug!(bundle_id, output = %output.output, "uninstall reported failure");
        }
        Ok(output.success())
    }

    /// Writes a PNG screenshot of the simulator screen to `path`.
    ///
    /// Blocks until simctl has finished writing.
    ///
    /// # Errors
    ///
    /// - [`SimctlError::Exec`] if `xcrun` cannot be launched
    /// - [`SimctlError::CommandFailed`] if the screenshot command fails
    pub fn screenshot(&self, path: &Path) -> Result<(), SimctlError> {
        let path = path.to_string_lossy();
        let output = self.run_sync(CommandSpec::sync([
            "xcrun",
            "simctl",
            "io",
            self.device.as_str(),
            "screenshot",
            path.as_ref(),
        ]))?;
        if !output.success() {
            return Err(SimctlError::CommandFailed(output.output));
        }
        Ok(())
    }

    /// Takes a screenshot and returns the PNG bytes.
    ///
    /// The image is written to a temporary file, read back, and removed.
    /// The file is removed whether or not the capture succeeded.
    ///
    /// # Errors
    ///
    /// As for [`screenshot`](Self::screenshot), plus [`SimctlError::Io`] if
    /// the temporary file cannot be read.
    pub fn screenshot_bytes(&self) -> Result<Vec<u8>, SimctlError> {
        let temp_path = std::env::temp_dir()
            .join(format!("xcrunner_screenshot_{}.png", uuid::Uuid::new_v4()));
        let bytes = self
            .screenshot(&temp_path)
            .and_then(|()| std::fs::read(&temp_path).map_err(SimctlError::from));
        let _ = std::fs::remove_file(&temp_path);
        bytes
    }

    /// Launches a pre-built XCTest runner against `device_id` in the background.
    ///
    /// Runs `xcodebuild test-without-building -xctestrun <file> -destination
    /// id=<device_id>` with its output redirected to a fresh
    /// `xctest_runner_<timestamp>.log` in the runner log directory. The first
    /// launch in a process initialises that directory (see [`crate::logs`]).
    ///
    /// # Errors
    ///
    /// - [`SimctlError::Logs`] if the log directory cannot be prepared
    /// - [`SimctlError::Exec`] if `xcodebuild` cannot be launched
    pub fn run_xctest_without_build(
        &self,
        device_id: &str,
        xctestrun: &Path,
    ) -> Result<DetachedProcess, SimctlError> {
        let dir = match &self.retention {
            Some(retention) => logs::init_log_directory(retention)?,
            None => logs::ensure_log_directory()?,
        };
        let log_path = logs::log_file_path_in(&dir);
        let xctestrun = xctestrun.to_string_lossy();
        let destination = format!("id={device_id}");
        let spec = CommandSpec::detached(
            [
                "xcodebuild",
                "test-without-building",
                "-xctestrun",
                xctestrun.as_ref(),
                "-destination",
                destination.as_str(),
            ],
            &log_path,
        );

        let process = self.runner.run(&spec)?.into_process()?;
        info!(device_id, pid = process.pid(), log = %log_path.display(), "launched XCTest runner");
        Ok(process)
    }
}

/// Single-quotes `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
