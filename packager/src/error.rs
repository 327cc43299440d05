//! Error types for the timetrax packager.
//!
//! This module defines semantic error variants that tell an operator which
//! stage of packaging failed. Every variant belongs to one [`ErrorCategory`],
//! and each category maps to a distinct process exit status so automation can
//! tell a bad dependency pin from a bad source tree from a broken
//! `completion` subcommand.

use crate::shell::Shell;
use crate::target::BuildTarget;
use camino::Utf8PathBuf;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while packaging timetrax.
#[derive(Debug, Error)]
pub enum PackagerError {
    /// The requested build target is not one of the supported identifiers.
    #[error("unsupported build target \"{value}\"; expected one of: {expected}")]
    UnsupportedTarget {
        /// The rejected identifier.
        value: String,
        /// Comma-separated list of accepted identifiers.
        expected: String,
    },

    /// No build target was supplied on the command line, the environment, or
    /// the configuration file.
    #[error("no build target given; pass --target or set TIMETRAX_TARGET (one of: {expected})")]
    MissingTarget {
        /// Comma-separated list of accepted identifiers.
        expected: String,
    },

    /// No executable that runs on the build host is available to generate
    /// completions for the requested target.
    #[error("cannot generate completions for {target}: no {target} or host-native build runs on this build host")]
    UnsupportedHost {
        /// The target that was requested.
        target: BuildTarget,
    },

    /// The packager configuration file could not be read or parsed.
    #[error("invalid configuration at {path}: {reason}")]
    InvalidConfig {
        /// Path to the configuration file.
        path: Utf8PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// The source tree does not contain a `Cargo.toml`.
    #[error("source tree not found: no Cargo.toml at {path}")]
    SourceNotFound {
        /// Expected manifest location.
        path: Utf8PathBuf,
    },

    /// The source tree has no `Cargo.lock`, so inputs cannot be pinned.
    #[error("Cargo.lock not found at {path}; run `cargo generate-lockfile` and commit it")]
    LockfileMissing {
        /// Expected lockfile location.
        path: Utf8PathBuf,
    },

    /// `Cargo.lock` exists but could not be parsed.
    #[error("invalid Cargo.lock at {path}: {reason}")]
    InvalidLockfile {
        /// Lockfile location.
        path: Utf8PathBuf,
        /// Description of the parse error.
        reason: String,
    },

    /// A locked package is not pinned to a content-addressed version.
    #[error("dependency {name} {version} is not pinned: {reason}")]
    UnpinnedDependency {
        /// Package name.
        name: String,
        /// Package version.
        version: String,
        /// Why the entry does not count as pinned.
        reason: String,
    },

    /// The toolchain file could not be parsed.
    #[error("invalid toolchain file: {reason}")]
    InvalidToolchainFile {
        /// Description of the parse error.
        reason: String,
    },

    /// The toolchain file names a floating channel.
    #[error("toolchain channel \"{channel}\" is not pinned; use a dated or versioned channel")]
    FloatingToolchain {
        /// The floating channel name.
        channel: String,
    },

    /// Fetching the locked dependency set failed.
    #[error("dependency fetch failed: {reason}")]
    FetchFailed {
        /// Description of the failure.
        reason: String,
    },

    /// `cargo build` failed for the requested target.
    #[error("cargo build failed for {target}: {reason}")]
    CompilationFailed {
        /// The target being compiled.
        target: BuildTarget,
        /// Description of the build failure.
        reason: String,
    },

    /// `cargo build` reported success but produced no executable.
    #[error("build finished but no executable was found at {path}")]
    ArtifactMissing {
        /// Where the executable was expected.
        path: Utf8PathBuf,
    },

    /// Two builds from the same inputs produced different executables.
    #[error("build for {target} is not reproducible: {first} != {second}")]
    NotReproducible {
        /// The target being compiled.
        target: BuildTarget,
        /// Digest of the first build.
        first: String,
        /// Digest of the second build.
        second: String,
    },

    /// One or more completion scripts could not be generated.
    #[error("completion generation failed for {}", CompletionFailure::summarise(.0))]
    CompletionFailed(Vec<CompletionFailure>),

    /// Failed to copy the artifact into the output tree.
    #[error("staging failed: {reason}")]
    StagingFailed {
        /// Description of the staging failure.
        reason: String,
    },

    /// The output directory exists but is not writable.
    #[error("output directory {path} is not writable: {reason}")]
    TargetNotWritable {
        /// Path to the non-writable directory.
        path: Utf8PathBuf,
        /// Description of the underlying I/O error.
        reason: String,
    },

    /// The output tree is not a complete package.
    #[error("output tree at {path} is not a complete package: {reason}")]
    IncompleteOutput {
        /// Root of the output tree.
        path: Utf8PathBuf,
        /// What is missing or does not match.
        reason: String,
    },

    /// The package manifest could not be serialised or deserialised.
    #[error("package manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// A path could not be represented as UTF-8.
    #[error("path is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// Lossy rendering of the offending path.
        path: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to write output.
    #[error("failed to write output")]
    WriteFailed {
        /// The underlying error that caused the write to fail.
        #[source]
        source: std::io::Error,
    },
}

/// Broad failure class used for reporting and exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid invocation or configuration, detected before any work.
    Configuration,
    /// The pinned input set could not be verified or fetched.
    DependencyResolution,
    /// The source failed to compile, or compiled non-reproducibly.
    Compilation,
    /// A completion script could not be generated.
    Install,
    /// Filesystem or other environmental failure.
    Environment,
}

impl ErrorCategory {
    /// Return the process exit status reported for this category.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Environment => 1,
            Self::Configuration => 2,
            Self::DependencyResolution => 3,
            Self::Compilation => 4,
            Self::Install => 5,
        }
    }

    /// Return the short label printed alongside error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::DependencyResolution => "dependency-resolution",
            Self::Compilation => "compilation",
            Self::Install => "install",
            Self::Environment => "environment",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl PackagerError {
    /// Classify the error for reporting.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedTarget { .. }
            | Self::MissingTarget { .. }
            | Self::UnsupportedHost { .. }
            | Self::InvalidConfig { .. }
            | Self::SourceNotFound { .. } => ErrorCategory::Configuration,
            Self::LockfileMissing { .. }
            | Self::InvalidLockfile { .. }
            | Self::UnpinnedDependency { .. }
            | Self::InvalidToolchainFile { .. }
            | Self::FloatingToolchain { .. }
            | Self::FetchFailed { .. } => ErrorCategory::DependencyResolution,
            Self::CompilationFailed { .. }
            | Self::ArtifactMissing { .. }
            | Self::NotReproducible { .. } => ErrorCategory::Compilation,
            Self::CompletionFailed(_) => ErrorCategory::Install,
            Self::StagingFailed { .. }
            | Self::TargetNotWritable { .. }
            | Self::IncompleteOutput { .. }
            | Self::Manifest(_)
            | Self::NonUtf8Path { .. }
            | Self::Io(_)
            | Self::WriteFailed { .. } => ErrorCategory::Environment,
        }
    }

    /// Return the shells whose completion generation failed, if any.
    #[must_use]
    pub fn failed_shells(&self) -> Vec<Shell> {
        match self {
            Self::CompletionFailed(failures) => failures.iter().map(|f| f.shell).collect(),
            _ => Vec::new(),
        }
    }
}

/// A failed completion invocation for one shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionFailure {
    /// The shell whose script could not be produced.
    pub shell: Shell,
    /// What went wrong.
    pub kind: CompletionFailureKind,
}

/// The ways a single completion invocation can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionFailureKind {
    /// The artifact exited with a non-success status.
    ExitStatus {
        /// Exit code, or `None` when terminated by a signal.
        code: Option<i32>,
        /// Trimmed standard error output.
        stderr: String,
    },
    /// The artifact did not finish within the allotted time.
    TimedOut {
        /// The timeout that elapsed.
        timeout: Duration,
    },
    /// The artifact could not be started or its output collected.
    Exec {
        /// Description of the execution error.
        reason: String,
    },
    /// The captured script could not be written.
    Write {
        /// Destination path.
        path: Utf8PathBuf,
        /// Description of the I/O error.
        reason: String,
    },
}

impl CompletionFailure {
    fn summarise(failures: &[Self]) -> String {
        failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for CompletionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.shell, self.kind)
    }
}

impl fmt::Display for CompletionFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitStatus { code: Some(code), stderr } if stderr.is_empty() => {
                write!(f, "exited with status {code}")
            }
            Self::ExitStatus { code: Some(code), stderr } => {
                write!(f, "exited with status {code}: {stderr}")
            }
            Self::ExitStatus { code: None, .. } => write!(f, "terminated by signal"),
            Self::TimedOut { timeout } => {
                write!(f, "timed out after {} seconds", timeout.as_secs())
            }
            Self::Exec { reason } => write!(f, "could not run generator: {reason}"),
            Self::Write { path, reason } => write!(f, "could not write {path}: {reason}"),
        }
    }
}

/// Result type alias using [`PackagerError`].
pub type Result<T> = std::result::Result<T, PackagerError>;
