//! # xcrunner-core
//!
//! Control-process core for driving an iOS Simulator during automated UI tests.
//!
//! This crate launches and queries the external tools a test run depends on
//! (`xcrun simctl`, `xcodebuild`, `networksetup`), turns their text output
//! into structured results, and keeps the runner's diagnostic logs bounded.
//!
//! ## Modules
//!
//! - [`command`] - Synchronous and detached process execution behind [`command::CommandRunner`]
//! - [`launchctl`] - Parsing of `launchctl list` and `simctl listapps` output
//! - [`poll`] - Time-bounded retry loops for liveness checks
//! - [`logs`] - Runner log directory setup and retention
//! - [`proxy`] - Host web proxy toggling via `networksetup`
//! - [`simctl`] - The simulator operations built on the above
//! - [`config`] - Persistent settings in `~/.xcrunner/config.json`
//!
//! ## External Dependencies
//!
//! - **Xcode** (for `xcrun simctl` and `xcodebuild`)
//! - **plutil** and **networksetup** (shipped with macOS)
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use xcrunner_core::simctl::Simctl;
//!
//! let simctl = Simctl::system();
//!
//! // Start the XCTest runner and wait for it to show up
//! let mut runner = simctl.run_xctest_without_build(
//!     "A1B2C3D4-E5F6-7890-ABCD-EF1234567890",
//!     Path::new("build/Runner.xctestrun"),
//! )?;
//! if !simctl.ensure_app_alive("dev.mobile.maestro-driver-iosUITests.xctrunner")? {
//!     runner.kill()?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod command;
pub mod config;
pub mod launchctl;
pub mod logs;
pub mod poll;
pub mod proxy;
pub mod simctl;
