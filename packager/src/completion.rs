//! Shell completion generation.
//!
//! timetrax generates its own completion scripts: `timetrax completion
//! --shell <id>` prints the script for one shell on stdout. The installer runs
//! that subcommand once per shell in [`Shell::ALL`] and writes each captured
//! stdout, unmodified, to the shell's conventional location under the output
//! root. Scripts are regenerated on every run and never cached.

use crate::atomic::write_atomic;
use crate::digest::Sha256Digest;
use crate::error::{CompletionFailure, CompletionFailureKind, PackagerError, Result};
use crate::exec::{CommandExecutor, CommandLine, ExecError};
use crate::shell::Shell;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::process::Output;
use std::time::Duration;

/// Default time allowed for one completion invocation.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of additional attempts after a spawn failure.
pub const DEFAULT_COMPLETION_RETRIES: u32 = 1;

/// What to do when one shell's completion cannot be generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Attempt every shell, then report all failures together.
    #[default]
    Aggregate,
    /// Stop at the first failing shell.
    FailFast,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aggregate => "aggregate",
            Self::FailFast => "fail-fast",
        })
    }
}

/// Settings for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionConfig {
    /// Time allowed for each invocation before it is killed.
    pub timeout: Duration,
    /// Extra attempts after the generator fails to start.
    pub retries: u32,
    /// Failure handling across shells.
    pub policy: FailurePolicy,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMPLETION_TIMEOUT,
            retries: DEFAULT_COMPLETION_RETRIES,
            policy: FailurePolicy::Aggregate,
        }
    }
}

/// One written completion script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledCompletion {
    /// The shell the script is for.
    pub shell: Shell,
    /// Where the script was written.
    pub path: Utf8PathBuf,
    /// SHA-256 of the script.
    pub sha256: Sha256Digest,
}

/// Every completion script written by a successful install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledCompletions {
    scripts: Vec<InstalledCompletion>,
}

impl InstalledCompletions {
    /// Return the scripts in installation order.
    #[must_use]
    pub fn scripts(&self) -> &[InstalledCompletion] {
        &self.scripts
    }

    /// Return the script installed for `shell`.
    #[must_use]
    pub fn get(&self, shell: Shell) -> Option<&InstalledCompletion> {
        self.scripts.iter().find(|s| s.shell == shell)
    }
}

impl FromIterator<InstalledCompletion> for InstalledCompletions {
    fn from_iter<I: IntoIterator<Item = InstalledCompletion>>(iter: I) -> Self {
        Self {
            scripts: iter.into_iter().collect(),
        }
    }
}

/// Runs the artifact's `completion` subcommand and installs the results.
pub struct CompletionInstaller<'a> {
    config: CompletionConfig,
    executor: &'a dyn CommandExecutor,
}

impl<'a> CompletionInstaller<'a> {
    /// Create an installer.
    #[must_use]
    pub fn new(config: CompletionConfig, executor: &'a dyn CommandExecutor) -> Self {
        Self { config, executor }
    }

    /// Generate and install completions for every shell.
    ///
    /// `generator` is an executable that honours the `completion --shell`
    /// contract; normally the artifact itself, or a host-native build of it
    /// when the artifact was cross-compiled.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::CompletionFailed`] listing every shell that
    /// failed (or only the first, under [`FailurePolicy::FailFast`]).
    pub fn install(
        &self,
        generator: &Utf8Path,
        output_root: &Utf8Path,
    ) -> Result<InstalledCompletions> {
        let mut installed = InstalledCompletions::default();
        let mut failures = Vec::new();

        for shell in Shell::ALL {
            match self.install_one(generator, shell, output_root) {
                Ok(script) => {
                    log::info!("installed {shell} completions to {}", script.path);
                    installed.scripts.push(script);
                }
                Err(kind) => {
                    log::warn!("{shell} completion failed: {kind}");
                    failures.push(CompletionFailure { shell, kind });
                    if self.config.policy == FailurePolicy::FailFast {
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(installed)
        } else {
            Err(PackagerError::CompletionFailed(failures))
        }
    }

    /// The invocation that asks `generator` for `shell`'s script.
    #[must_use]
    pub fn completion_command(&self, generator: &Utf8Path, shell: Shell) -> CommandLine {
        CommandLine::new(generator.as_str())
            .args(shell.completion_args())
            .timeout(self.config.timeout)
    }

    fn install_one(
        &self,
        generator: &Utf8Path,
        shell: Shell,
        output_root: &Utf8Path,
    ) -> std::result::Result<InstalledCompletion, CompletionFailureKind> {
        let path = shell.install_path(output_root);
        let write_failed = |path: &Utf8Path, e: std::io::Error| CompletionFailureKind::Write {
            path: path.to_owned(),
            reason: e.to_string(),
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| write_failed(dir, e))?;
        }

        let output = self.generate(generator, shell)?;
        write_atomic(&path, &output.stdout).map_err(|e| write_failed(&path, e))?;

        Ok(InstalledCompletion {
            shell,
            sha256: Sha256Digest::of_bytes(&output.stdout),
            path,
        })
    }

    fn generate(
        &self,
        generator: &Utf8Path,
        shell: Shell,
    ) -> std::result::Result<Output, CompletionFailureKind> {
        let command = self.completion_command(generator, shell);
        let mut attempt = 0;

        loop {
            match self.executor.run(&command) {
                Ok(output) if output.status.success() => return Ok(output),
                Ok(output) => {
                    return Err(CompletionFailureKind::ExitStatus {
                        code: output.status.code(),
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
                    });
                }
                Err(ExecError::TimedOut { timeout, .. }) => {
                    return Err(CompletionFailureKind::TimedOut { timeout });
                }
                Err(err @ ExecError::Spawn { .. }) if attempt < self.config.retries => {
                    attempt += 1;
                    log::warn!("{err}; retrying {shell} completion (attempt {})", attempt + 1);
                }
                Err(err) => {
                    return Err(CompletionFailureKind::Exec {
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "completion_tests.rs"]
mod tests;
