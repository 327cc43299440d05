//! Shared test utilities for the packager crate.

use crate::exec::{CommandExecutor, CommandLine, ExecError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::process::{ExitStatus, Output};

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// Creates a successful command `Output` with the given stdout.
#[must_use]
pub fn success_output(stdout: &[u8]) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given exit code and stderr.
#[must_use]
pub fn exit_output(code: i32, stderr: &[u8]) -> Output {
    Output {
        status: exit_status(code),
        stdout: Vec::new(),
        stderr: stderr.to_vec(),
    }
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The program to execute (e.g., "cargo").
    pub program: String,
    /// The arguments to pass to the program.
    pub args: Vec<String>,
    /// The result to return when this command is invoked.
    pub result: Result<Output, ExecError>,
}

impl ExpectedCall {
    /// Expect `program args...` and answer with `result`.
    #[must_use]
    pub fn new(program: &str, args: &[&str], result: Result<Output, ExecError>) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            result,
        }
    }
}

/// A stub implementation of `CommandExecutor` for testing.
///
/// Replays predefined results for an ordered list of expected invocations
/// and records every command it receives.
#[derive(Debug)]
pub struct StubExecutor {
    expected: RefCell<VecDeque<ExpectedCall>>,
    received: RefCell<Vec<CommandLine>>,
}

impl StubExecutor {
    /// Creates a new `StubExecutor` with the given expected calls.
    #[must_use]
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
            received: RefCell::new(Vec::new()),
        }
    }

    /// Returns every command received so far, in order.
    #[must_use]
    pub fn received(&self) -> Vec<CommandLine> {
        self.received.borrow().clone()
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        assert!(
            self.expected.borrow().is_empty(),
            "expected no further command invocations"
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, command: &CommandLine) -> Result<Output, ExecError> {
        self.received.borrow_mut().push(command.clone());

        let Some(call) = self.expected.borrow_mut().pop_front() else {
            return Err(ExecError::StubMismatch {
                message: format!("unexpected command: {command}"),
            });
        };

        if call.program != command.program() || call.args != command.arguments() {
            return Err(ExecError::StubMismatch {
                message: format!(
                    "expected {} {}, got {command}",
                    call.program,
                    call.args.join(" ")
                ),
            });
        }

        call.result
    }
}
