//! Cargo build orchestration for the timetrax executable.
//!
//! Builds run with `--locked --offline` against the inputs fixed by
//! [`crate::resolution`], in a scratch target directory, with an environment
//! that removes the usual sources of nondeterminism: incremental state,
//! embedded build timestamps, and absolute source and build directory paths.
//!
//! Path remapping is passed as a `--config` rustflags override rather than
//! through `RUSTFLAGS`, which would replace any flags the checkout's own
//! `.cargo/config.toml` declares. Inherited `RUSTFLAGS` and
//! `CARGO_ENCODED_RUSTFLAGS` are cleared for the same reason.

use crate::PROGRAM_NAME;
use crate::digest::Sha256Digest;
use crate::error::{PackagerError, Result};
use crate::exec::{CommandExecutor, CommandLine, stderr_message};
use crate::resolution::ResolvedInputs;
use crate::target::BuildTarget;
use camino::{Utf8Path, Utf8PathBuf};

/// Prefix that replaces the source root in compiled paths.
pub const REMAPPED_SOURCE_ROOT: &str = "/build/timetrax";

/// Prefix that replaces the cargo target directory in compiled paths.
///
/// Build scripts write generated code under the target directory, so its
/// absolute location would otherwise differ between the primary build and
/// the reproducibility build.
pub const REMAPPED_TARGET_DIR: &str = "/build/target";

/// Environment variables that would take precedence over configured
/// rustflags.
const OVERRIDING_FLAG_VARS: [&str; 2] = ["CARGO_ENCODED_RUSTFLAGS", "RUSTFLAGS"];

/// Default `SOURCE_DATE_EPOCH` when none is configured.
pub const DEFAULT_SOURCE_DATE_EPOCH: u64 = 1;

/// Configuration for the build process.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Scratch directory holding every intermediate build output.
    pub scratch_dir: Utf8PathBuf,
    /// Number of parallel build jobs (None for cargo default).
    pub jobs: Option<usize>,
    /// Number of `-v` flags passed through to cargo.
    pub verbosity: u8,
    /// Timestamp exported as `SOURCE_DATE_EPOCH`.
    pub source_date_epoch: u64,
}

impl BuildConfig {
    /// Create a configuration with default settings for `scratch_dir`.
    #[must_use]
    pub fn new(scratch_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            jobs: None,
            verbosity: 0,
            source_date_epoch: DEFAULT_SOURCE_DATE_EPOCH,
        }
    }

    /// Cargo target directory for the primary build.
    #[must_use]
    pub fn target_dir(&self) -> Utf8PathBuf {
        self.scratch_dir.join("cargo")
    }

    /// Cargo target directory for the reproducibility check build.
    #[must_use]
    pub fn verify_target_dir(&self) -> Utf8PathBuf {
        self.scratch_dir.join("cargo-verify")
    }
}

/// A compiled timetrax executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Program name; always [`PROGRAM_NAME`].
    pub program: String,
    /// Platform the executable was compiled for.
    pub target: BuildTarget,
    /// Location of the executable.
    pub path: Utf8PathBuf,
    /// SHA-256 of the executable.
    pub sha256: Sha256Digest,
}

impl Artifact {
    /// Describe an existing executable at `path` built for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::ArtifactMissing`] if `path` is not a file,
    /// or an I/O error if it cannot be hashed.
    pub fn from_path(target: BuildTarget, path: &Utf8Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PackagerError::ArtifactMissing {
                path: path.to_owned(),
            });
        }
        Ok(Self {
            program: PROGRAM_NAME.to_owned(),
            target,
            path: path.to_owned(),
            sha256: Sha256Digest::of_file(path)?,
        })
    }
}

/// Builder for compiling timetrax.
pub struct Builder<'a> {
    config: BuildConfig,
    executor: &'a dyn CommandExecutor,
}

impl<'a> Builder<'a> {
    /// Create a new builder with the given configuration.
    #[must_use]
    pub fn new(config: BuildConfig, executor: &'a dyn CommandExecutor) -> Self {
        Self { config, executor }
    }

    /// Build timetrax for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::CompilationFailed`] if cargo fails and
    /// [`PackagerError::ArtifactMissing`] if cargo succeeds without producing
    /// the executable.
    pub fn build(&self, inputs: &ResolvedInputs, target: BuildTarget) -> Result<Artifact> {
        self.build_into(inputs, target, &self.config.target_dir())
    }

    /// Build timetrax for `target`, optionally building it a second time in a
    /// fresh target directory and comparing the two executables.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Builder::build`], and
    /// [`PackagerError::NotReproducible`] if the two builds differ.
    pub fn build_verified(
        &self,
        inputs: &ResolvedInputs,
        target: BuildTarget,
        verify_reproducible: bool,
    ) -> Result<Artifact> {
        let artifact = self.build(inputs, target)?;
        if !verify_reproducible {
            return Ok(artifact);
        }

        log::info!("rebuilding {target} to check reproducibility");
        let second = self.build_into(inputs, target, &self.config.verify_target_dir())?;
        if second.sha256 != artifact.sha256 {
            return Err(PackagerError::NotReproducible {
                target,
                first: artifact.sha256.to_string(),
                second: second.sha256.to_string(),
            });
        }
        Ok(artifact)
    }

    /// The cargo invocation that compiles `target` into `target_dir`.
    #[must_use]
    pub fn build_command(
        &self,
        inputs: &ResolvedInputs,
        target: BuildTarget,
        target_dir: &Utf8Path,
    ) -> CommandLine {
        let source_root = inputs.source_root();
        let mut cmd = CommandLine::new("cargo")
            .args(inputs.toolchain_args())
            .args(["build", "--release", "--locked", "--offline"])
            .args(["--bin", PROGRAM_NAME])
            .args(["--target", target.rust_triple()])
            .arg("--manifest-path")
            .arg(inputs.source.manifest_path().as_str())
            .arg("--config")
            .arg(rustflags_override(inputs, target, target_dir));

        if let Some(jobs) = self.config.jobs {
            cmd = cmd.args(["-j".to_owned(), jobs.to_string()]);
        }
        for _ in 0..self.config.verbosity {
            cmd = cmd.arg("-v");
        }

        for var in OVERRIDING_FLAG_VARS {
            cmd = cmd.env_remove(var);
        }
        cmd.env("CARGO_TARGET_DIR", target_dir.as_str())
            .env("CARGO_INCREMENTAL", "0")
            .env("SOURCE_DATE_EPOCH", self.config.source_date_epoch.to_string())
            .current_dir(source_root)
    }

    fn build_into(
        &self,
        inputs: &ResolvedInputs,
        target: BuildTarget,
        target_dir: &Utf8Path,
    ) -> Result<Artifact> {
        let cmd = self.build_command(inputs, target, target_dir);
        log::info!("compiling {PROGRAM_NAME} for {target} ({})", target.rust_triple());

        let output = self
            .executor
            .run(&cmd)
            .map_err(|e| PackagerError::CompilationFailed {
                target,
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PackagerError::CompilationFailed {
                target,
                reason: stderr_message(&output),
            });
        }

        let artifact = Artifact::from_path(target, &artifact_path(target_dir, target))?;
        log::debug!("built {} ({})", artifact.path, artifact.sha256.short());
        Ok(artifact)
    }
}

/// The `KEY=VALUE` argument for `cargo --config` that appends the path
/// remapping flags.
///
/// Cargo merges arrays from `--config` with the same key from config files.
/// The key is `target.<triple>.rustflags` when the checkout sets flags under
/// a target table, since `build.rustflags` is then ignored.
fn rustflags_override(
    inputs: &ResolvedInputs,
    target: BuildTarget,
    target_dir: &Utf8Path,
) -> String {
    let key = if inputs.source.declares_target_rustflags() {
        format!("target.{}.rustflags", target.rust_triple())
    } else {
        "build.rustflags".to_owned()
    };
    // rustc lets later prefixes win, and the default target directory lies
    // inside the source root.
    let flags = toml::Value::Array(vec![
        toml::Value::String(format!(
            "--remap-path-prefix={}={REMAPPED_SOURCE_ROOT}",
            inputs.source_root()
        )),
        toml::Value::String(format!("--remap-path-prefix={target_dir}={REMAPPED_TARGET_DIR}")),
    ]);
    format!("{key}={flags}")
}

/// Return where cargo places the executable for `target` in `target_dir`.
#[must_use]
pub fn artifact_path(target_dir: &Utf8Path, target: BuildTarget) -> Utf8PathBuf {
    target_dir
        .join(target.rust_triple())
        .join("release")
        .join(PROGRAM_NAME)
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
