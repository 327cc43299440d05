//! CLI argument definitions for the timetrax packager.
//!
//! This module defines the command-line interface using clap and merges the
//! parsed flags with [`PackagerConfig`] into the contexts the pipeline runs
//! on. Flags override the configuration file; the file overrides defaults.

use crate::completion::{CompletionConfig, FailurePolicy};
use crate::config::{CompletionSection, PackagerConfig};
use crate::error::{PackagerError, Result};
use crate::pipeline::{InstallContext, PipelineContext};
use crate::target::BuildTarget;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::time::Duration;

/// Environment variable consulted when `--target` is not given.
pub const TARGET_ENV: &str = "TIMETRAX_TARGET";

/// Build, stage, and package the timetrax CLI with shell completions.
#[derive(Parser, Debug)]
#[command(name = "timetrax-packager")]
#[command(version, about)]
#[command(long_about = concat!(
    "Build, stage, and package the timetrax CLI with shell completions.\n\n",
    "The packager compiles timetrax from a source checkout with pinned inputs ",
    "(Cargo.lock and the rust-toolchain file), stages the executable into an ",
    "output tree, asks it for bash, zsh, and fish completion scripts, and ",
    "records a manifest of everything it wrote.\n\n",
    "The manifest is written last. A tree without one is incomplete.",
))]
#[command(after_help = concat!(
    "TARGETS:\n",
    "  x86_64-linux     x86_64-unknown-linux-gnu\n",
    "  aarch64-linux    aarch64-unknown-linux-gnu\n",
    "  aarch64-darwin   aarch64-apple-darwin\n",
    "  x86_64-darwin    x86_64-apple-darwin\n\n",
    "EXAMPLES:\n",
    "  Package for this machine:\n",
    "    $ timetrax-packager package --source . --target x86_64-linux --out dist\n\n",
    "  Preview without building:\n",
    "    $ timetrax-packager package --target aarch64-darwin --out dist --dry-run\n\n",
    "  Generate completions for an existing build:\n",
    "    $ timetrax-packager install-completions --artifact target/release/timetrax --out dist\n\n",
    "  Check an output tree:\n",
    "    $ timetrax-packager verify --out dist\n\n",
    "EXIT STATUS:\n",
    "  1 environment, 2 configuration, 3 dependency resolution, 4 compilation,\n",
    "  5 completion install",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Increase output verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        alias = "verbosity",
        action = ArgAction::Count,
        global = true,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, global = true, conflicts_with = "verbosity")]
    pub quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build timetrax, stage it, and install its completions.
    Package(PackageArgs),

    /// Install completions for an already-built timetrax executable.
    InstallCompletions(InstallCompletionsArgs),

    /// Check an output tree against its manifest.
    Verify(VerifyArgs),

    /// List supported targets.
    Targets(TargetsArgs),
}

/// Flags controlling completion generation.
#[derive(Args, Debug, Clone, Default)]
pub struct CompletionArgs {
    /// Seconds allowed for each completion invocation [default: 30].
    #[arg(long, value_name = "SECS")]
    pub completion_timeout: Option<u64>,

    /// Extra attempts when the generator cannot be started [default: 1].
    #[arg(long, value_name = "N")]
    pub completion_retries: Option<u32>,

    /// Stop at the first failing shell instead of reporting all of them.
    #[arg(long)]
    pub fail_fast: bool,
}

impl CompletionArgs {
    /// Merge these flags over the `[completions]` table.
    #[must_use]
    pub fn resolve(&self, section: &CompletionSection) -> CompletionConfig {
        let defaults = CompletionConfig::default();
        let policy = if self.fail_fast {
            FailurePolicy::FailFast
        } else {
            section.failure_policy.unwrap_or(defaults.policy)
        };
        CompletionConfig {
            timeout: self
                .completion_timeout
                .or(section.timeout_secs)
                .map_or(defaults.timeout, Duration::from_secs),
            retries: self
                .completion_retries
                .or(section.retries)
                .unwrap_or(defaults.retries),
            policy,
        }
    }
}

/// Arguments for the package command.
#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// timetrax source checkout.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub source: Utf8PathBuf,

    /// Target platform identifier.
    #[arg(short, long, value_name = "ID", env = TARGET_ENV)]
    pub target: Option<String>,

    /// Output tree root.
    #[arg(short, long, value_name = "DIR")]
    pub out: Utf8PathBuf,

    /// Directory for intermediate build output
    /// [default: <SOURCE>/target/timetrax-packager].
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<Utf8PathBuf>,

    /// Configuration file [default: <SOURCE>/timetrax-packager.toml].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Number of parallel cargo build jobs.
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Show configuration and exit without building.
    #[arg(long)]
    pub dry_run: bool,

    /// Build twice and fail if the executables differ.
    #[arg(long)]
    pub verify_reproducible: bool,

    /// Completion generation flags.
    #[command(flatten)]
    pub completions: CompletionArgs,
}

impl PackageArgs {
    /// Load the configuration file these arguments point at.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::InvalidConfig`] for unreadable or invalid
    /// files.
    pub fn load_config(&self) -> Result<PackagerConfig> {
        PackagerConfig::load(self.config.as_deref(), Some(&self.source))
    }

    /// Build the pipeline context from these flags and `config`.
    ///
    /// Relative paths are made absolute against the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::MissingTarget`] when no target is given
    /// anywhere, and [`PackagerError::UnsupportedTarget`] for unknown
    /// identifiers.
    pub fn pipeline_context(
        &self,
        config: &PackagerConfig,
        verbosity: u8,
        quiet: bool,
    ) -> Result<PipelineContext> {
        let target = resolve_target(self.target.as_deref(), config.build.target)?;
        let source_root = absolute(&self.source)?;
        let scratch_dir = match &self.scratch_dir {
            Some(dir) => absolute(dir)?,
            None => default_scratch_dir(&source_root),
        };

        Ok(PipelineContext {
            output_root: absolute(&self.out)?,
            scratch_dir,
            target,
            jobs: self.jobs.or(config.build.jobs),
            verbosity,
            source_date_epoch: config
                .build
                .source_date_epoch
                .unwrap_or(crate::builder::DEFAULT_SOURCE_DATE_EPOCH),
            verify_reproducible: self.verify_reproducible || config.build.verify_reproducible,
            completions: self.completions.resolve(&config.completions),
            quiet,
            source_root,
        })
    }
}

/// Arguments for the install-completions command.
#[derive(Args, Debug, Clone)]
pub struct InstallCompletionsArgs {
    /// Prebuilt timetrax executable.
    #[arg(short, long, value_name = "PATH")]
    pub artifact: Utf8PathBuf,

    /// Output tree root.
    #[arg(short, long, value_name = "DIR")]
    pub out: Utf8PathBuf,

    /// Platform the executable was built for [default: this host].
    #[arg(short, long, value_name = "ID", env = TARGET_ENV)]
    pub target: Option<String>,

    /// Configuration file for completion settings.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Completion generation flags.
    #[command(flatten)]
    pub completions: CompletionArgs,
}

impl InstallCompletionsArgs {
    /// Build the install context from these flags and `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::UnsupportedTarget`] for unknown identifiers
    /// and [`PackagerError::MissingTarget`] when none is given and the host
    /// is not a supported target.
    pub fn install_context(&self, config: &PackagerConfig, quiet: bool) -> Result<InstallContext> {
        let fallback = config.build.target.or_else(BuildTarget::host);
        Ok(InstallContext {
            artifact: absolute(&self.artifact)?,
            output_root: absolute(&self.out)?,
            target: resolve_target(self.target.as_deref(), fallback)?,
            completions: self.completions.resolve(&config.completions),
            quiet,
        })
    }
}

/// Arguments for the verify command.
#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Output tree root.
    #[arg(short, long, value_name = "DIR")]
    pub out: Utf8PathBuf,
}

/// Arguments for the targets command.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetsArgs {
    /// Output in JSON format for scripting.
    #[arg(long)]
    pub json: bool,
}

/// Pick the target from an explicit identifier or a fallback.
///
/// # Errors
///
/// Returns [`PackagerError::UnsupportedTarget`] for unknown identifiers and
/// [`PackagerError::MissingTarget`] when neither is present.
pub fn resolve_target(explicit: Option<&str>, fallback: Option<BuildTarget>) -> Result<BuildTarget> {
    match explicit {
        Some(value) => value.trim().parse(),
        None => fallback.ok_or_else(|| PackagerError::MissingTarget {
            expected: BuildTarget::expected_list(),
        }),
    }
}

/// Scratch directory used when `--scratch-dir` is not given.
#[must_use]
pub fn default_scratch_dir(source_root: &Utf8Path) -> Utf8PathBuf {
    source_root.join("target").join("timetrax-packager")
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf> {
    let absolute = std::path::absolute(path)?;
    Utf8PathBuf::from_path_buf(absolute).map_err(|path| PackagerError::NonUtf8Path {
        path: path.to_string_lossy().into_owned(),
    })
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
