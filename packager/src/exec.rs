//! External command execution.
//!
//! Every subprocess the packager starts (`cargo fetch`, `cargo build`, and
//! the artifact's own `completion` subcommand) goes through the
//! [`CommandExecutor`] trait so that tests can substitute canned responses.
//! The system implementation captures stdout and stderr in full and enforces
//! an optional timeout.

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use wait_timeout::ChildExt;

/// A fully described command invocation.
///
/// # Examples
///
/// ```
/// use timetrax_packager::exec::CommandLine;
///
/// let cmd = CommandLine::new("cargo")
///     .args(["build", "--release"])
///     .env("CARGO_INCREMENTAL", "0");
/// assert_eq!(cmd.to_string(), "cargo build --release");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    removed_envs: Vec<String>,
    current_dir: Option<Utf8PathBuf>,
    timeout: Option<Duration>,
}

impl CommandLine {
    /// Start describing an invocation of `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            removed_envs: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Clear an inherited environment variable for the child.
    #[must_use]
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.removed_envs.push(key.into());
        self
    }

    /// Run the child in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Kill the child if it has not exited after `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The program to run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The argument list.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Look up an environment override by name.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Inherited environment variables cleared for the child.
    #[must_use]
    pub fn removed_envs(&self) -> &[String] {
        &self.removed_envs
    }

    /// Working directory, if set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.current_dir.as_deref()
    }

    /// Timeout, if set.
    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for key in self.removed_envs() {
            cmd.env_remove(key);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir.as_std_path());
        }
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Failures that prevent a command from producing an [`Output`].
///
/// A command that runs and exits non-zero is not an `ExecError`; callers
/// inspect the returned status.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the process or collecting its output failed.
    #[error("failed to collect output from {program}: {source}")]
    Wait {
        /// Program being waited on.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its timeout and was killed.
    #[error("{program} timed out after {} seconds", timeout.as_secs())]
    TimedOut {
        /// Program that was killed.
        program: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Test stub received an unexpected or mismatched command invocation.
    #[cfg(any(test, feature = "test-support"))]
    #[error("stub mismatch: {message}")]
    StubMismatch {
        /// Description of what was expected versus what was received.
        message: String,
    },
}

/// Abstraction for running external commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandExecutor {
    /// Runs the command and returns its captured output.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecError`] if the process cannot be started, times out,
    /// or its output cannot be collected.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use timetrax_packager::exec::{CommandExecutor, CommandLine, SystemCommandExecutor};
    ///
    /// let executor = SystemCommandExecutor;
    /// let output = executor.run(&CommandLine::new("cargo").arg("--version"))?;
    /// assert!(output.status.success());
    /// # Ok::<(), timetrax_packager::exec::ExecError>(())
    /// ```
    fn run(&self, command: &CommandLine) -> Result<Output, ExecError>;
}

/// Executes commands on the host system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, command: &CommandLine) -> Result<Output, ExecError> {
        match command.working_dir() {
            Some(dir) => log::debug!("running {command} in {dir}"),
            None => log::debug!("running {command}"),
        }
        match command.timeout_duration() {
            Some(timeout) => run_with_timeout(command, timeout),
            None => command
                .to_command()
                .output()
                .map_err(|source| ExecError::Spawn {
                    program: command.program.clone(),
                    source,
                }),
        }
    }
}

/// Runs a command, killing it if it outlives `timeout`.
///
/// Both pipes are drained on background threads while waiting so a child
/// that writes more than a pipe buffer's worth of output cannot stall.
fn run_with_timeout(command: &CommandLine, timeout: Duration) -> Result<Output, ExecError> {
    let mut child = command
        .to_command()
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: command.program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let wait_err = |source| ExecError::Wait {
        program: command.program.clone(),
        source,
    };

    let Some(status) = child.wait_timeout(timeout).map_err(wait_err)? else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ExecError::TimedOut {
            program: command.program.clone(),
            timeout,
        });
    };

    Ok(Output {
        status,
        stdout: join_drain(stdout).map_err(wait_err)?,
        stderr: join_drain(stderr).map_err(wait_err)?,
    })
}

type Drain = thread::JoinHandle<std::io::Result<Vec<u8>>>;

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Drain {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_drain(handle: Option<Drain>) -> std::io::Result<Vec<u8>> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| std::io::Error::other("output reader thread panicked"))?,
        None => Ok(Vec::new()),
    }
}

/// Return trimmed stderr, or a placeholder when it is empty.
#[must_use]
pub fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        match output.status.code() {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_owned(),
        }
    } else {
        trimmed.to_owned()
    }
}
