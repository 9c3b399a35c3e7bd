//! Shared test helpers for xcrunner-core integration tests.
//!
//! [`ScriptedRunner`] stands in for real processes: it records every
//! [`CommandSpec`] it is asked to run and answers from a queue of canned
//! replies.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};

use xcrunner_core::command::{
    CommandOutput, CommandRunner, CommandSpec, DetachedProcess, ExecError, Execution,
    ExecutionMode,
};

/// A canned answer for one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// The command ran and exited with `code`, printing `output`.
    Exit(i32, String),
    /// The program could not be found.
    Missing,
    /// A detached launch with the given pid.
    Launched(u32),
    /// Writes the bytes to the path in the last argument, then exits with
    /// the code, like a tool that produces a file.
    Writes(i32, Vec<u8>),
}

impl Reply {
    pub fn ok(output: &str) -> Self {
        Self::Exit(0, output.to_string())
    }

    pub fn fail(code: i32, output: &str) -> Self {
        Self::Exit(code, output.to_string())
    }
}

/// Records specs and replays [`Reply`]s in order.
///
/// Once the queue is empty the fallback reply (if any) is repeated;
/// without one, an unexpected command panics the test.
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    replies: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
}

impl ScriptedRunner {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
            fallback: None,
        })
    }

    pub fn repeating(replies: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
            fallback: Some(fallback),
        })
    }

    /// Every spec run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// The argv of every spec run so far, in order.
    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls().iter().map(|spec| spec.argv().to_vec()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<Execution, ExecError> {
        self.calls.lock().unwrap().push(spec.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| panic!("unexpected command: {spec}"));

        match reply {
            Reply::Exit(code, output) => {
                Ok(Execution::Completed(CommandOutput::exited(code, output)))
            }
            Reply::Missing => Err(ExecError::Spawn {
                program: spec.program().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            }),
            Reply::Launched(pid) => match spec.mode() {
                ExecutionMode::Detached { output } => {
                    Ok(Execution::Detached(DetachedProcess::untracked(pid, output)))
                }
                ExecutionMode::Synchronous { .. } => {
                    panic!("detached reply for synchronous command: {spec}")
                }
            },
            Reply::Writes(code, bytes) => {
                let path = spec.args().last().expect("file-writing reply needs a path");
                fs::write(path, bytes)?;
                Ok(Execution::Completed(CommandOutput::exited(code, "")))
            }
        }
    }
}

/// Convenience: turn a slice of `&str` into the owned argv shape specs use.
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// A `launchctl list` capture with the given rows under the usual header.
pub fn launchctl_listing(rows: &[&str]) -> String {
    let mut out = String::from("PID\tStatus\tLabel\n");
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    out
}
