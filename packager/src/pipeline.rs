//! Packaging pipeline orchestration.
//!
//! Sequences the stages of a package run: invalidate the previous manifest,
//! resolve pinned inputs, compile, stage the executable, generate completion
//! scripts, and finally record the manifest. Each stage runs to completion
//! before the next starts; the first error aborts the run and leaves the
//! output tree without a manifest.

use crate::builder::{Artifact, BuildConfig, Builder};
use crate::completion::{CompletionConfig, CompletionInstaller, InstalledCompletions};
use crate::digest::Sha256Digest;
use crate::error::{PackagerError, Result};
use crate::exec::{CommandExecutor, CommandLine, ExecError};
use crate::manifest::{ManifestProvenance, PackageManifest, remove_manifest, write_manifest};
use crate::output::{DryRunInfo, success_message, write_stderr_line};
use crate::resolution::{ResolutionRequest, ResolvedInputs, resolve_inputs};
use crate::stager::Stager;
use crate::target::BuildTarget;
use camino::{Utf8Path, Utf8PathBuf};
use std::io::Write;
use std::process::Output;

/// Settings for a full package run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Root of the timetrax checkout.
    pub source_root: Utf8PathBuf,
    /// Root of the output tree.
    pub output_root: Utf8PathBuf,
    /// Scratch directory for intermediate build output.
    pub scratch_dir: Utf8PathBuf,
    /// Platform to package for.
    pub target: BuildTarget,
    /// Number of parallel build jobs.
    pub jobs: Option<usize>,
    /// Verbosity level.
    pub verbosity: u8,
    /// Value exported as `SOURCE_DATE_EPOCH`.
    pub source_date_epoch: u64,
    /// Build twice and compare digests.
    pub verify_reproducible: bool,
    /// Completion generation settings.
    pub completions: CompletionConfig,
    /// Suppress progress output.
    pub quiet: bool,
}

impl PipelineContext {
    fn build_config(&self) -> BuildConfig {
        BuildConfig {
            scratch_dir: self.scratch_dir.clone(),
            jobs: self.jobs,
            verbosity: self.verbosity,
            source_date_epoch: self.source_date_epoch,
        }
    }

    fn resolution_request(&self, skip_fetch: bool) -> ResolutionRequest {
        ResolutionRequest {
            source_root: self.source_root.clone(),
            excluded_dirs: vec![self.output_root.clone(), self.scratch_dir.clone()],
            skip_fetch,
        }
    }
}

/// Settings for installing completions against an existing executable.
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// The prebuilt timetrax executable.
    pub artifact: Utf8PathBuf,
    /// Root of the output tree.
    pub output_root: Utf8PathBuf,
    /// Platform the executable was built for.
    pub target: BuildTarget,
    /// Completion generation settings.
    pub completions: CompletionConfig,
    /// Suppress progress output.
    pub quiet: bool,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PackageReport {
    /// Platform the package is for.
    pub target: BuildTarget,
    /// Staged executable path.
    pub binary: Utf8PathBuf,
    /// SHA-256 of the staged executable.
    pub binary_sha256: Sha256Digest,
    /// Installed completion scripts.
    pub completions: InstalledCompletions,
    /// Written manifest path.
    pub manifest: Utf8PathBuf,
    /// Source identity, for full package runs.
    pub source_identity: Option<Sha256Digest>,
}

/// Choose which build generates completions for `target`.
///
/// The target artifact itself when it runs on `host`; otherwise a
/// host-native build.
///
/// # Errors
///
/// Returns [`PackagerError::UnsupportedHost`] when the target does not run
/// on the host and the host is not a supported target.
pub fn generator_target(target: BuildTarget, host: Option<BuildTarget>) -> Result<BuildTarget> {
    match host {
        Some(host) if host == target => Ok(target),
        Some(host) => Ok(host),
        None => Err(PackagerError::UnsupportedHost { target }),
    }
}

/// Run the full pipeline.
///
/// Prints progress to stderr if not in quiet mode.
///
/// # Errors
///
/// Returns the first stage error. No manifest is present afterwards.
pub fn package(
    context: &PipelineContext,
    executor: &dyn CommandExecutor,
    stderr: &mut dyn Write,
) -> Result<PackageReport> {
    let target = context.target;
    let generator = generator_target(target, BuildTarget::host())?;
    let mut progress = Progress::new(context.quiet, stderr);

    if remove_manifest(&context.output_root)? {
        log::info!("removed previous manifest from {}", context.output_root);
    }
    let stager = Stager::new(context.output_root.clone());
    stager.prepare()?;

    progress.line(format!("Resolving pinned inputs in {}...", context.source_root));
    let inputs = resolve_inputs(executor, &context.resolution_request(false))?;

    let builder = Builder::new(context.build_config(), executor);
    progress.line(format!(
        "Compiling timetrax for {target} ({})...",
        target.rust_triple()
    ));
    let artifact = builder.build_verified(&inputs, target, context.verify_reproducible)?;

    let host_artifact = if generator == target {
        None
    } else {
        progress.line(format!(
            "Compiling host build for {generator} to generate completions..."
        ));
        Some(builder.build(&inputs, generator)?)
    };

    progress.line(format!("Staging executable to {}...", stager.binary_path()));
    let binary = stager.stage(&artifact)?;

    let generator_path = host_artifact
        .as_ref()
        .map_or(binary.as_path(), |host| host.path.as_path());
    progress.line("Generating shell completions...");
    let completions = CompletionInstaller::new(context.completions, executor)
        .install(generator_path, &context.output_root)?;

    let provenance = provenance_for(&inputs, target);
    let manifest = PackageManifest::new(provenance, artifact.sha256.clone(), &completions);
    let manifest_path = write_manifest(&context.output_root, &manifest)?;

    progress.blank();
    progress.line(success_message(
        target,
        completions.scripts().len(),
        &context.output_root,
    ));

    Ok(PackageReport {
        target,
        binary,
        binary_sha256: artifact.sha256,
        completions,
        manifest: manifest_path,
        source_identity: Some(inputs.identity),
    })
}

/// Print the resolved configuration without building or writing anything.
///
/// Reads the lockfile and toolchain file to report pin problems early, but
/// runs no commands.
///
/// # Errors
///
/// Returns the same resolution errors as [`package`].
pub fn dry_run(context: &PipelineContext, stderr: &mut dyn Write) -> Result<()> {
    let inputs = resolve_inputs(&NoCommands, &context.resolution_request(true))?;
    let identity = inputs.identity.to_string();

    let info = DryRunInfo {
        source_root: &context.source_root,
        output_root: &context.output_root,
        scratch_dir: &context.scratch_dir,
        target: context.target,
        generator_target: generator_target(context.target, BuildTarget::host()).ok(),
        toolchain: inputs.toolchain.as_ref().map(|t| t.channel()),
        source_identity: Some(&identity),
        jobs: context.jobs,
        source_date_epoch: context.source_date_epoch,
        verify_reproducible: context.verify_reproducible,
        completions: context.completions,
    };
    write_stderr_line(stderr, info.display_text());
    Ok(())
}

/// Stage an existing executable and install its completions.
///
/// # Errors
///
/// Returns [`PackagerError::UnsupportedHost`] if the executable cannot run
/// on this host, and staging, completion, or manifest errors otherwise.
pub fn install_only(
    context: &InstallContext,
    executor: &dyn CommandExecutor,
    stderr: &mut dyn Write,
) -> Result<PackageReport> {
    if !context.target.runs_on_host() {
        return Err(PackagerError::UnsupportedHost {
            target: context.target,
        });
    }
    let mut progress = Progress::new(context.quiet, stderr);

    remove_manifest(&context.output_root)?;
    let artifact = Artifact::from_path(context.target, &context.artifact)?;
    let stager = Stager::new(context.output_root.clone());
    let binary = if same_file(&artifact.path, &stager.binary_path()) {
        stager.binary_path()
    } else {
        progress.line(format!("Staging executable to {}...", stager.binary_path()));
        stager.prepare()?;
        stager.stage(&artifact)?
    };

    progress.line("Generating shell completions...");
    let completions = CompletionInstaller::new(context.completions, executor)
        .install(&binary, &context.output_root)?;

    let provenance = ManifestProvenance::for_target(context.target);
    let manifest = PackageManifest::new(provenance, artifact.sha256.clone(), &completions);
    let manifest_path = write_manifest(&context.output_root, &manifest)?;

    progress.blank();
    progress.line(success_message(
        context.target,
        completions.scripts().len(),
        &context.output_root,
    ));

    Ok(PackageReport {
        target: context.target,
        binary,
        binary_sha256: artifact.sha256,
        completions,
        manifest: manifest_path,
        source_identity: None,
    })
}

fn provenance_for(inputs: &ResolvedInputs, target: BuildTarget) -> ManifestProvenance {
    ManifestProvenance {
        toolchain: inputs.toolchain.as_ref().map(|t| t.channel().to_owned()),
        source_identity: Some(inputs.identity.clone()),
        ..ManifestProvenance::for_target(target)
    }
}

fn same_file(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (a.canonicalize_utf8(), b.canonicalize_utf8()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Progress printer that honours quiet mode.
struct Progress<'a> {
    quiet: bool,
    stderr: &'a mut dyn Write,
}

impl<'a> Progress<'a> {
    fn new(quiet: bool, stderr: &'a mut dyn Write) -> Self {
        Self { quiet, stderr }
    }

    fn line(&mut self, message: impl std::fmt::Display) {
        if !self.quiet {
            write_stderr_line(self.stderr, message);
        }
    }

    fn blank(&mut self) {
        self.line("");
    }
}

/// Executor for dry runs, which must not start processes.
struct NoCommands;

impl CommandExecutor for NoCommands {
    fn run(&self, command: &CommandLine) -> std::result::Result<Output, ExecError> {
        Err(ExecError::Spawn {
            program: command.program().to_owned(),
            source: std::io::Error::other("commands are disabled during a dry run"),
        })
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
