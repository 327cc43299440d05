//! Pinned input resolution.
//!
//! Before anything is compiled, the packager establishes that the build's
//! inputs are fixed: every dependency in `Cargo.lock` is content-addressed,
//! any toolchain file names an exact compiler, and the locked
//! dependency set is present locally so the build itself can run offline.
//! Failures here are reported as dependency-resolution errors, distinct from
//! compilation errors.

use crate::digest::Sha256Digest;
use crate::error::{PackagerError, Result};
use crate::exec::{CommandExecutor, CommandLine, stderr_message};
use crate::lockfile::{PinnedLockfile, read_lockfile};
use crate::source::SourceTree;
use crate::toolchain::{TOOLCHAIN_FILES, Toolchain};
use camino::{Utf8Path, Utf8PathBuf};

/// What to resolve.
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    /// Root of the timetrax checkout.
    pub source_root: Utf8PathBuf,
    /// Directories inside the source tree that belong to the packager
    /// (scratch and output) and must not affect the source identity.
    pub excluded_dirs: Vec<Utf8PathBuf>,
    /// Skip `cargo fetch`; used by dry runs.
    pub skip_fetch: bool,
}

/// The verified, fetched input set for one build.
#[derive(Debug, Clone)]
pub struct ResolvedInputs {
    /// The source checkout.
    pub source: SourceTree,
    /// Every locked package with its pin.
    pub lockfile: PinnedLockfile,
    /// The pinned toolchain, or `None` for the ambient one.
    pub toolchain: Option<Toolchain>,
    /// Digest over the source tree's files.
    pub identity: Sha256Digest,
}

impl ResolvedInputs {
    /// Root of the source checkout.
    #[must_use]
    pub fn source_root(&self) -> &Utf8Path {
        self.source.root()
    }

    /// The leading `cargo` arguments selecting the toolchain, if pinned.
    #[must_use]
    pub fn toolchain_args(&self) -> Vec<String> {
        self.toolchain
            .iter()
            .map(Toolchain::cargo_arg)
            .collect()
    }
}

/// Verify pins, fetch locked dependencies, and hash the source tree.
///
/// # Errors
///
/// Returns [`PackagerError::SourceNotFound`] when the tree has no
/// `Cargo.toml`, a dependency-resolution error when the lockfile or the
/// toolchain is not pinned or `cargo fetch` fails, and an I/O error if the
/// source tree cannot be read.
pub fn resolve_inputs(
    executor: &dyn CommandExecutor,
    request: &ResolutionRequest,
) -> Result<ResolvedInputs> {
    let source = SourceTree::open(&request.source_root)?;

    let lockfile = read_lockfile(&source.lockfile_path())?;
    log::info!(
        "Cargo.lock pins {} packages ({} external)",
        lockfile.packages.len(),
        lockfile.external_count()
    );

    let toolchain = Toolchain::detect(source.root())?;
    match &toolchain {
        Some(toolchain) => log::info!("using pinned toolchain {}", toolchain.channel()),
        None => log::warn!(
            "no {} in {}; building with the ambient toolchain",
            TOOLCHAIN_FILES.join(" or "),
            source.root()
        ),
    }

    if !request.skip_fetch {
        fetch_locked(executor, &source, toolchain.as_ref())?;
    }

    let identity = source.identity(&request.excluded_dirs)?;
    log::info!("source identity {}", identity.short());

    Ok(ResolvedInputs {
        source,
        lockfile,
        toolchain,
        identity,
    })
}

/// Build the `cargo fetch` invocation for a source tree.
#[must_use]
pub fn fetch_command(source: &SourceTree, toolchain: Option<&Toolchain>) -> CommandLine {
    CommandLine::new("cargo")
        .args(toolchain.map(Toolchain::cargo_arg))
        .args(["fetch", "--locked", "--manifest-path"])
        .arg(source.manifest_path().as_str())
}

fn fetch_locked(
    executor: &dyn CommandExecutor,
    source: &SourceTree,
    toolchain: Option<&Toolchain>,
) -> Result<()> {
    let command = fetch_command(source, toolchain);
    let output = executor
        .run(&command)
        .map_err(|e| PackagerError::FetchFailed {
            reason: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(PackagerError::FetchFailed {
            reason: stderr_message(&output),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecError, MockCommandExecutor};
    use crate::test_utils::{exit_output, success_output};
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;

    const LOCKFILE: &str = "version = 4\n\n[[package]]\nname = \"timetrax\"\nversion = \"0.1.0\"\n";

    struct Checkout {
        _dir: TempDir,
        root: Utf8PathBuf,
    }

    impl Checkout {
        fn request(&self) -> ResolutionRequest {
            ResolutionRequest {
                source_root: self.root.clone(),
                excluded_dirs: Vec::new(),
                skip_fetch: false,
            }
        }
    }

    #[fixture]
    fn checkout() -> Checkout {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 path");
        fs::write(root.join("Cargo.toml"), "[package]\nname = \"timetrax\"\n").expect("manifest");
        fs::write(root.join("Cargo.lock"), LOCKFILE).expect("lockfile");
        Checkout { _dir: dir, root }
    }

    fn never_called() -> MockCommandExecutor {
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();
        executor
    }

    #[rstest]
    fn fetches_with_locked_flag(checkout: Checkout) {
        let manifest = checkout.root.join("Cargo.toml");
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(move |cmd| {
                cmd.program() == "cargo"
                    && cmd.arguments()
                        == ["fetch", "--locked", "--manifest-path", manifest.as_str()]
            })
            .times(1)
            .returning(|_| Ok(success_output(b"")));

        let inputs = resolve_inputs(&executor, &checkout.request()).expect("resolves");
        assert!(inputs.toolchain.is_none());
        assert!(inputs.toolchain_args().is_empty());
        assert_eq!(inputs.lockfile.packages.len(), 1);
    }

    #[rstest]
    fn pinned_toolchain_selects_channel(checkout: Checkout) {
        fs::write(
            checkout.root.join("rust-toolchain.toml"),
            "[toolchain]\nchannel = \"1.85.0\"\n",
        )
        .expect("toolchain file");
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(|cmd| cmd.arguments().first().map(String::as_str) == Some("+1.85.0"))
            .times(1)
            .returning(|_| Ok(success_output(b"")));

        let inputs = resolve_inputs(&executor, &checkout.request()).expect("resolves");
        assert_eq!(inputs.toolchain_args(), ["+1.85.0"]);
    }

    #[rstest]
    #[case::toml_file("rust-toolchain.toml", "[toolchain]\nchannel = \"stable\"\n")]
    #[case::legacy_file("rust-toolchain", "stable\n")]
    fn floating_toolchain_is_rejected_before_fetch(
        checkout: Checkout,
        #[case] file: &str,
        #[case] contents: &str,
    ) {
        fs::write(checkout.root.join(file), contents).expect("toolchain file");

        let err = resolve_inputs(&never_called(), &checkout.request())
            .expect_err("floating channel");
        assert!(matches!(err, PackagerError::FloatingToolchain { .. }));
    }

    #[rstest]
    fn missing_lockfile_is_rejected_before_fetch(checkout: Checkout) {
        fs::remove_file(checkout.root.join("Cargo.lock")).expect("remove lockfile");

        let err = resolve_inputs(&never_called(), &checkout.request())
            .expect_err("no lockfile");
        assert!(matches!(err, PackagerError::LockfileMissing { .. }));
    }

    #[rstest]
    fn unpinned_dependency_is_rejected_before_fetch(checkout: Checkout) {
        let contents = format!(
            "{LOCKFILE}\n[[package]]\nname = \"serde\"\nversion = \"1.0.0\"\nsource = \"registry+https://github.com/rust-lang/crates.io-index\"\n"
        );
        fs::write(checkout.root.join("Cargo.lock"), contents).expect("lockfile");

        let err = resolve_inputs(&never_called(), &checkout.request())
            .expect_err("unpinned dependency");
        assert!(matches!(err, PackagerError::UnpinnedDependency { ref name, .. } if name == "serde"));
    }

    #[rstest]
    fn fetch_failure_is_a_dependency_error(checkout: Checkout) {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .returning(|_| Ok(exit_output(101, b"error: failed to download `serde`")));

        let err = resolve_inputs(&executor, &checkout.request()).expect_err("fetch fails");
        assert!(
            matches!(err, PackagerError::FetchFailed { ref reason } if reason.contains("serde")),
            "got {err:?}"
        );
        assert_eq!(err.category(), crate::error::ErrorCategory::DependencyResolution);
    }

    #[rstest]
    fn fetch_spawn_failure_is_a_dependency_error(checkout: Checkout) {
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().returning(|_| {
            Err(ExecError::Spawn {
                program: "cargo".to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });

        let err = resolve_inputs(&executor, &checkout.request()).expect_err("no cargo");
        assert!(matches!(err, PackagerError::FetchFailed { .. }));
    }

    #[rstest]
    fn skip_fetch_runs_no_commands(checkout: Checkout) {
        let request = ResolutionRequest {
            skip_fetch: true,
            ..checkout.request()
        };
        let inputs = resolve_inputs(&never_called(), &request).expect("resolves");
        assert_eq!(inputs.source_root(), checkout.root);
    }
}
