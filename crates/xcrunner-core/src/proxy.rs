//! Host HTTP/HTTPS proxy toggling through `networksetup`.
//!
//! Routing simulator traffic through a local proxy means pointing the host's
//! active network service at it, once for plain HTTP and once for HTTPS.
//! Both directions run two `networksetup` invocations strictly in order and
//! stop at the first one that fails. There is no rollback: a failure on the
//! second step leaves the first step applied, and [`ProxyError::completed`]
//! says which steps that covers.
//!
//! # Example
//!
//! ```no_run
//! use xcrunner_core::proxy::ProxyController;
//!
//! let proxy = ProxyController::system("Wi-Fi");
//! proxy.enable("127.0.0.1", 8080)?;
//! // ... run the flow ...
//! proxy.disable()?;
//! # Ok::<(), xcrunner_core::proxy::ProxyError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandRunner, CommandSpec, ExecError, SystemRunner};

/// Network service the proxy is applied to unless configured otherwise.
pub const DEFAULT_NETWORK_SERVICE: &str = "Wi-Fi";

const NETWORKSETUP: &str = "networksetup";

/// One `networksetup` invocation in an enable or disable sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyStep {
    /// `-setwebproxy <service> <host> <port>`
    SetWebProxy,
    /// `-setsecurewebproxy <service> <host> <port>`
    SetSecureWebProxy,
    /// `-setwebproxystate <service> off`
    DisableWebProxy,
    /// `-setsecurewebproxystate <service> off`
    DisableSecureWebProxy,
}

impl ProxyStep {
    /// The `networksetup` flag for this step.
    pub fn flag(self) -> &'static str {
        match self {
            Self::SetWebProxy => "-setwebproxy",
            Self::SetSecureWebProxy => "-setsecurewebproxy",
            Self::DisableWebProxy => "-setwebproxystate",
            Self::DisableSecureWebProxy => "-setsecurewebproxystate",
        }
    }
}

impl fmt::Display for ProxyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// A proxy sequence stopped partway.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// `networksetup` could not be launched for `step`.
    #[error("networksetup {step} could not be launched: {source}")]
    Launch {
        /// The step that failed.
        step: ProxyStep,
        /// Steps that had already been applied.
        completed: Vec<ProxyStep>,
        /// Why the launch failed.
        #[source]
        source: ExecError,
    },

    /// `networksetup` ran for `step` but reported failure.
    #[error("networksetup {step} failed (exit {status:?}): {output}")]
    StepFailed {
        /// The step that failed.
        step: ProxyStep,
        /// Steps that had already been applied.
        completed: Vec<ProxyStep>,
        /// Exit code, if the tool exited normally.
        status: Option<i32>,
        /// Merged tool output.
        output: String,
    },
}

impl ProxyError {
    /// The step that failed.
    pub fn step(&self) -> ProxyStep {
        match self {
            Self::Launch { step, .. } | Self::StepFailed { step, .. } => *step,
        }
    }

    /// Steps applied before the failure, in order.
    pub fn completed(&self) -> &[ProxyStep] {
        match self {
            Self::Launch { completed, .. } | Self::StepFailed { completed, .. } => completed,
        }
    }

    /// Whether the host was left with some, but not all, settings changed.
    pub fn is_partial(&self) -> bool {
        !self.completed().is_empty()
    }
}

/// Issues proxy enable/disable sequences against one network service.
#[derive(Clone)]
pub struct ProxyController {
    runner: Arc<dyn CommandRunner>,
    service: String,
}

impl ProxyController {
    /// Creates a controller over `runner` for the named network service.
    pub fn new(runner: Arc<dyn CommandRunner>, service: impl Into<String>) -> Self {
        Self {
            runner,
            service: service.into(),
        }
    }

    /// Creates a controller that runs real `networksetup` processes.
    pub fn system(service: impl Into<String>) -> Self {
        Self::new(Arc::new(SystemRunner), service)
    }

    /// The network service this controller configures.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Points the web and secure web proxies at `host:port`.
    ///
    /// # Errors
    ///
    /// [`ProxyError`] for the first step that fails; see the module docs for
    /// what state that leaves behind.
    pub fn enable(&self, host: &str, port: u16) -> Result<(), ProxyError> {
        let port = port.to_string();
        self.run_sequence(&[
            (ProxyStep::SetWebProxy, [host, port.as_str()]),
            (ProxyStep::SetSecureWebProxy, [host, port.as_str()]),
        ])?;
        info!(service = %self.service, host, port, "proxy enabled");
        Ok(())
    }

    /// Turns the web and secure web proxies off.
    ///
    /// # Errors
    ///
    /// [`ProxyError`] for the first step that fails.
    pub fn disable(&self) -> Result<(), ProxyError> {
        self.run_sequence(&[
            (ProxyStep::DisableWebProxy, ["off"]),
            (ProxyStep::DisableSecureWebProxy, ["off"]),
        ])?;
        info!(service = %self.service, "proxy disabled");
        Ok(())
    }

    fn run_sequence<const N: usize>(
        &self,
        steps: &[(ProxyStep, [&str; N])],
    ) -> Result<(), ProxyError> {
        let mut completed = Vec::with_capacity(steps.len());
        for (step, values) in steps {
            let step = *step;
            let spec = CommandSpec::sync(
                [NETWORKSETUP, step.flag(), self.service.as_str()]
                    .into_iter()
                    .chain(values.iter().copied()),
            );
            let output = match self.runner.run(&spec).and_then(|e| e.into_output()) {
                Ok(output) => output,
                Err(source) => {
                    return Err(ProxyError::Launch {
                        step,
                        completed,
                        source,
                    })
                }
            };
            if !output.success() {
                return Err(ProxyError::StepFailed {
                    step,
                    completed,
                    status: output.status,
                    output: output.output,
                });
            }
            debug!(%step, service = %self.service, "proxy step applied");
            completed.push(step);
        }
        Ok(())
    }
}
