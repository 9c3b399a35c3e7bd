//! External command execution.
//!
//! Every tool the core drives (`xcrun`, `xcodebuild`, `networksetup`, `bash`)
//! is launched through a [`CommandRunner`]. A [`CommandSpec`] describes one
//! invocation and carries its [`ExecutionMode`]:
//!
//! - **Synchronous** runs block the calling thread until the child exits.
//!   Standard error is merged into standard output through a single pipe so
//!   the captured text keeps the interleaving the tool produced, unless the
//!   spec asks for [`discard_stderr`](CommandSpec::discard_stderr). An
//!   optional timeout bounds how long the caller waits; it never kills the
//!   child.
//! - **Detached** runs redirect both streams to a file and return at once
//!   with a [`DetachedProcess`] handle. Nothing in this crate tracks the
//!   child after that.
//!
//! A non-zero exit code is reported in [`CommandOutput::status`] and left to
//! the caller to interpret. Only a failure to launch the executable is an
//! error ([`ExecError::Spawn`]).
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use xcrunner_core::command::{CommandRunner, CommandSpec, SystemRunner};
//!
//! let spec = CommandSpec::sync(["xcrun", "simctl", "list", "devices"])
//!     .with_timeout(Duration::from_secs(5));
//! let output = SystemRunner.run(&spec)?.into_output()?;
//! println!("exit={:?}\n{}", output.status, output.output);
//! # Ok::<(), xcrunner_core::command::ExecError>(())
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

/// How often a timed synchronous wait checks whether the child has exited.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Minimum time spent draining the pipe once a timed child has exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Errors raised while launching or waiting on an external command.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The executable could not be found or failed to start.
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        /// The program that was being launched.
        program: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// An I/O error occurred while wiring up or reading the child's streams.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The runner produced a different kind of execution than the caller asked for.
    #[error("expected a {expected} execution")]
    ModeMismatch {
        /// The mode the caller expected (`"synchronous"` or `"detached"`).
        expected: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Command description
// ---------------------------------------------------------------------------

/// How a [`CommandSpec`] is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Block until the child exits and capture its merged output.
    Synchronous {
        /// Upper bound on how long the caller waits. `None` waits forever.
        timeout: Option<Duration>,
    },
    /// Return immediately; the child's stdout and stderr go to `output`.
    Detached {
        /// File receiving the child's output. Created or truncated on launch.
        output: PathBuf,
    },
}

/// A single external command invocation.
///
/// The first element of `argv` is the program; the rest are its arguments.
/// Specs are built once and never mutated by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    argv: Vec<String>,
    mode: ExecutionMode,
    merge_stderr: bool,
}

impl CommandSpec {
    /// A synchronous invocation with no wait timeout.
    pub fn sync<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            mode: ExecutionMode::Synchronous { timeout: None },
            merge_stderr: true,
        }
    }

    /// A detached invocation whose output is written to `output`.
    pub fn detached<I, S>(argv: I, output: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            mode: ExecutionMode::Detached {
                output: output.into(),
            },
            merge_stderr: true,
        }
    }

    /// Bounds the wait of a synchronous invocation. Has no effect on detached specs.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let ExecutionMode::Synchronous { timeout: slot } = &mut self.mode {
            *slot = Some(timeout);
        }
        self
    }

    /// Drops standard error from the captured output of a synchronous run.
    ///
    /// For tools whose stdout is machine-readable and whose stderr carries
    /// warnings. Detached specs always send both streams to their file.
    pub fn discard_stderr(mut self) -> Self {
        self.merge_stderr = false;
        self
    }

    /// Whether a synchronous run captures standard error with standard output.
    pub fn merges_stderr(&self) -> bool {
        self.merge_stderr
    }

    /// The program name (first argv element), or `""` for an empty spec.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// The full argument vector, program included.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The execution mode.
    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

// ---------------------------------------------------------------------------
// Execution results
// ---------------------------------------------------------------------------

/// Captured result of a synchronous run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code. `None` if the wait timed out or the child died from a signal.
    pub status: Option<i32>,
    /// Standard output (with standard error merged in unless the spec
    /// discards it), lossily decoded as UTF-8.
    pub output: String,
    /// Whether the caller stopped waiting before the output was complete,
    /// either because the child was still running or because its pipe was
    /// still held open by a descendant.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Builds an output for a child that exited with `code`.
    pub fn exited(code: i32, output: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            output: output.into(),
            timed_out: false,
        }
    }

    fn finished(status: ExitStatus, bytes: &[u8]) -> Self {
        Self {
            status: status.code(),
            output: String::from_utf8_lossy(bytes).into_owned(),
            timed_out: false,
        }
    }

    fn truncated(status: ExitStatus, bytes: &[u8]) -> Self {
        Self {
            status: status.code(),
            output: String::from_utf8_lossy(bytes).into_owned(),
            timed_out: true,
        }
    }

    fn abandoned(bytes: &[u8]) -> Self {
        Self {
            status: None,
            output: String::from_utf8_lossy(bytes).into_owned(),
            timed_out: true,
        }
    }

    /// Returns `true` if the child exited with code 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Handle to a child launched in detached mode.
///
/// Dropping the handle does not kill the child.
#[derive(Debug)]
pub struct DetachedProcess {
    pid: u32,
    output: PathBuf,
    child: Option<Child>,
}

impl DetachedProcess {
    fn spawned(child: Child, output: PathBuf) -> Self {
        Self {
            pid: child.id(),
            output,
            child: Some(child),
        }
    }

    /// A handle with no OS child behind it, for [`CommandRunner`] substitutes.
    ///
    /// [`kill`](Self::kill) is a no-op and the wait methods report no status.
    pub fn untracked(pid: u32, output: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            output: output.into(),
            child: None,
        }
    }

    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// File the child's output is redirected to.
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Sends a kill signal to the child.
    pub fn kill(&mut self) -> io::Result<()> {
        match &mut self.child {
            Some(child) => child.kill(),
            None => Ok(()),
        }
    }

    /// Checks for exit without blocking.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        match &mut self.child {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    /// Blocks until the child exits.
    pub fn wait(&mut self) -> io::Result<Option<ExitStatus>> {
        match &mut self.child {
            Some(child) => child.wait().map(Some),
            None => Ok(None),
        }
    }

    /// Gives up the handle and returns the underlying [`Child`], if any.
    pub fn into_child(self) -> Option<Child> {
        self.child
    }
}

/// What a [`CommandRunner`] produced for a spec.
#[derive(Debug)]
pub enum Execution {
    /// A synchronous run finished (or its wait timed out).
    Completed(CommandOutput),
    /// A detached run was launched.
    Detached(DetachedProcess),
}

impl Execution {
    /// Unwraps a synchronous result.
    ///
    /// # Errors
    ///
    /// [`ExecError::ModeMismatch`] if this is a detached execution.
    pub fn into_output(self) -> Result<CommandOutput, ExecError> {
        match self {
            Self::Completed(output) => Ok(output),
            Self::Detached(_) => Err(ExecError::ModeMismatch {
                expected: "synchronous",
            }),
        }
    }

    /// Unwraps a detached handle.
    ///
    /// # Errors
    ///
    /// [`ExecError::ModeMismatch`] if this is a synchronous execution.
    pub fn into_process(self) -> Result<DetachedProcess, ExecError> {
        match self {
            Self::Detached(process) => Ok(process),
            Self::Completed(_) => Err(ExecError::ModeMismatch {
                expected: "detached",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Runners
// ---------------------------------------------------------------------------

/// Capability to execute external commands.
///
/// Components hold an `Arc<dyn CommandRunner>` so tests can substitute a
/// scripted implementation for [`SystemRunner`].
pub trait CommandRunner: Send + Sync {
    /// Executes `spec` according to its [`ExecutionMode`].
    ///
    /// # Errors
    ///
    /// [`ExecError::Spawn`] when the program cannot be started; [`ExecError::Io`]
    /// when its streams cannot be set up or read.
    fn run(&self, spec: &CommandSpec) -> Result<Execution, ExecError>;
}

/// Runs commands as real OS processes via [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<Execution, ExecError> {
        debug!(command = %spec, "running command");
        match spec.mode() {
            ExecutionMode::Synchronous { timeout } => {
                run_synchronous(spec, *timeout).map(Execution::Completed)
            }
            ExecutionMode::Detached { output } => {
                spawn_detached(spec, output).map(Execution::Detached)
            }
        }
    }
}

fn base_command(spec: &CommandSpec) -> Command {
    let mut command = Command::new(spec.program());
    command.args(spec.args()).stdin(Stdio::null());
    command
}

/// Spawns `command`, consuming it so the parent's copies of any redirected
/// stream handles are closed once the child holds its own.
fn spawn(mut command: Command, spec: &CommandSpec) -> Result<Child, ExecError> {
    command.spawn().map_err(|source| ExecError::Spawn {
        program: spec.program().to_string(),
        source,
    })
}

fn run_synchronous(
    spec: &CommandSpec,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ExecError> {
    let (mut reader, writer) = io::pipe()?;
    let mut command = base_command(spec);
    if spec.merges_stderr() {
        command.stdout(writer.try_clone()?).stderr(writer);
    } else {
        command.stdout(writer).stderr(Stdio::null());
    }
    let mut child = spawn(command, spec)?;

    let Some(timeout) = timeout else {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let status = child.wait()?;
        trace!(command = %spec, status = ?status.code(), "command finished");
        return Ok(CommandOutput::finished(status, &bytes));
    };

    // The reader runs on its own thread so a quiet child cannot stall the
    // deadline check, and so output captured so far survives a timeout.
    let captured = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel::<()>();
    {
        let captured = Arc::clone(&captured);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => captured
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(chunk.get(..n).unwrap_or_default()),
                }
            }
            let _ = done_tx.send(());
        });
    }
    let snapshot = || {
        captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            // A descendant may still hold the pipe open after the child exits.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if done_rx.recv_timeout(remaining.max(EXIT_DRAIN_GRACE)).is_err() {
                debug!(command = %spec, status = ?status.code(), "output still open after exit");
                return Ok(CommandOutput::truncated(status, &snapshot()));
            }
            trace!(command = %spec, status = ?status.code(), "command finished");
            return Ok(CommandOutput::finished(status, &snapshot()));
        }
        if Instant::now() >= deadline {
            debug!(command = %spec, ?timeout, "stopped waiting for command");
            return Ok(CommandOutput::abandoned(&snapshot()));
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

fn spawn_detached(spec: &CommandSpec, output: &Path) -> Result<DetachedProcess, ExecError> {
    let file = File::create(output)?;
    let mut command = base_command(spec);
    command.stdout(file.try_clone()?).stderr(file);
    let child = spawn(command, spec)?;
    debug!(
        command = %spec,
        pid = child.id(),
        output = %output.display(),
        "launched detached command"
    );
    Ok(DetachedProcess::spawned(child, output.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_splits_program_and_args() {
        let spec = CommandSpec::sync(["xcrun", "simctl", "list"]);
        assert_eq!(spec.program(), "xcrun");
        assert_eq!(spec.args(), ["simctl", "list"]);
        assert_eq!(spec.to_string(), "xcrun simctl list");
    }

    #[test]
    fn empty_spec_has_empty_program() {
        let spec = CommandSpec::sync(Vec::<String>::new());
        assert_eq!(spec.program(), "");
        assert!(spec.args().is_empty());
    }

    #[test]
    fn timeout_only_applies_to_synchronous_specs() {
        let sync = CommandSpec::sync(["true"]).with_timeout(Duration::from_secs(3));
        assert_eq!(
            sync.mode(),
            &ExecutionMode::Synchronous {
                timeout: Some(Duration::from_secs(3))
            }
        );

        let detached =
            CommandSpec::detached(["true"], "/tmp/out.log").with_timeout(Duration::from_secs(3));
        assert_eq!(
            detached.mode(),
            &ExecutionMode::Detached {
                output: PathBuf::from("/tmp/out.log")
            }
        );
    }

    #[test]
    fn stderr_is_merged_unless_discarded() {
        let merged = CommandSpec::sync(["xcrun", "simctl", "listapps", "booted"]);
        assert!(merged.merges_stderr());

        let quiet = merged.clone().discard_stderr();
        assert!(!quiet.merges_stderr());
        assert_eq!(quiet.argv(), merged.argv());
        assert_ne!(quiet, merged);
    }

    #[test]
    fn execution_mode_mismatch_is_reported() {
        let completed = Execution::Completed(CommandOutput::exited(0, ""));
        assert!(matches!(
            completed.into_process(),
            Err(ExecError::ModeMismatch { expected: "detached" })
        ));

        let detached = Execution::Detached(DetachedProcess::untracked(42, "/tmp/x.log"));
        assert!(matches!(
            detached.into_output(),
            Err(ExecError::ModeMismatch { expected: "synchronous" })
        ));
    }

    #[test]
    fn command_output_success_requires_zero_exit() {
        assert!(CommandOutput::exited(0, "ok").success());
        assert!(!CommandOutput::exited(1, "no").success());
        assert!(!CommandOutput::abandoned(b"partial").success());
    }

    #[test]
    fn untracked_process_is_inert() {
        let mut process = DetachedProcess::untracked(4242, "/tmp/runner.log");
        assert_eq!(process.pid(), 4242);
        assert_eq!(process.output_path(), Path::new("/tmp/runner.log"));
        assert!(process.kill().is_ok());
        assert!(process.try_wait().unwrap().is_none());
        assert!(process.wait().unwrap().is_none());
        assert!(process.into_child().is_none());
    }

    #[test]
    fn spawn_error_display_names_program() {
        let err = ExecError::Spawn {
            program: "xcrun".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert_eq!(
            err.to_string(),
            "failed to launch `xcrun`: No such file or directory"
        );
    }
}
