//! End-to-end packaging against a stand-in timetrax executable.
//!
//! Cargo is replaced by an executor that "compiles" by copying a shell
//! script into the build directory. Everything after compilation, including
//! running the completion generator with a timeout, uses real processes.

#![cfg(unix)]

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::Output;
use std::time::Duration;
use tempfile::TempDir;
use timetrax_packager::builder::artifact_path;
use timetrax_packager::completion::{CompletionConfig, FailurePolicy};
use timetrax_packager::error::{CompletionFailureKind, ErrorCategory, PackagerError};
use timetrax_packager::exec::{CommandExecutor, CommandLine, ExecError, SystemCommandExecutor};
use timetrax_packager::manifest::{manifest_path, verify_output_tree};
use timetrax_packager::pipeline::{PipelineContext, package};
use timetrax_packager::shell::Shell;
use timetrax_packager::target::BuildTarget;
use timetrax_packager::test_utils::success_output;

const WELL_BEHAVED: &str = r#"#!/bin/sh
if [ "$1" = "completion" ] && [ "$2" = "--shell" ]; then
  case "$3" in
    bash) printf '# bash completion for timetrax\n' ;;
    zsh) printf '#compdef timetrax\n' ;;
    fish) printf 'complete -c timetrax -f\n' ;;
    *) echo "unknown shell: $3" >&2; exit 2 ;;
  esac
  exit 0
fi
exit 64
"#;

const BROKEN_ZSH: &str = r#"#!/bin/sh
case "$3" in
  zsh) echo "zsh completions are not implemented" >&2; exit 3 ;;
  *) printf '# %s completion for timetrax\n' "$3" ;;
esac
"#;

const HANGS_ON_FISH: &str = r#"#!/bin/sh
case "$3" in
  fish) exec sleep 5 ;;
  *) printf '# %s completion for timetrax\n' "$3" ;;
esac
"#;

/// Answers `cargo` itself and runs everything else for real.
struct ScriptCargo {
    script: &'static str,
}

impl CommandExecutor for ScriptCargo {
    fn run(&self, command: &CommandLine) -> Result<Output, ExecError> {
        if command.program() != "cargo" {
            return SystemCommandExecutor.run(command);
        }
        if command.arguments().iter().any(|a| a == "build") {
            let target_dir = command.env_value("CARGO_TARGET_DIR").unwrap_or("target");
            let target = BuildTarget::host().expect("supported host");
            let path = artifact_path(&Utf8PathBuf::from(target_dir), target);
            fs::create_dir_all(path.parent().expect("release dir")).expect("create release dir");
            fs::write(&path, self.script).expect("write executable");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        }
        Ok(success_output(b""))
    }
}

struct Checkout {
    _dir: TempDir,
    context: PipelineContext,
}

#[fixture]
fn checkout() -> Option<Checkout> {
    let target = BuildTarget::host()?;
    let dir = tempfile::tempdir().expect("temp dir");
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 temp path");
    let source = root.join("timetrax");
    fs::create_dir_all(source.join("src")).expect("source dir");
    fs::write(source.join("Cargo.toml"), "[package]\nname = \"timetrax\"\n").expect("manifest");
    fs::write(
        source.join("Cargo.lock"),
        "version = 4\n\n[[package]]\nname = \"timetrax\"\nversion = \"0.1.0\"\n",
    )
    .expect("lockfile");
    fs::write(source.join("src/main.rs"), "fn main() {}\n").expect("main.rs");

    let context = PipelineContext {
        scratch_dir: source.join("target/timetrax-packager"),
        output_root: root.join("dist"),
        source_root: source,
        target,
        jobs: None,
        verbosity: 0,
        source_date_epoch: 1,
        verify_reproducible: true,
        completions: CompletionConfig::default(),
        quiet: true,
    };
    Some(Checkout { _dir: dir, context })
}

#[rstest]
fn packages_scripts_byte_for_byte(checkout: Option<Checkout>) {
    let Some(checkout) = checkout else { return };
    let executor = ScriptCargo { script: WELL_BEHAVED };

    let report = package(&checkout.context, &executor, &mut Vec::new()).expect("package");

    let out = &checkout.context.output_root;
    let bash = fs::read(Shell::Bash.install_path(out)).expect("bash script");
    assert_eq!(bash, b"# bash completion for timetrax\n");
    let fish = fs::read(Shell::Fish.install_path(out)).expect("fish script");
    assert_eq!(fish, b"complete -c timetrax -f\n");

    let manifest = verify_output_tree(out).expect("complete tree");
    assert_eq!(manifest.executable.sha256, report.binary_sha256);
    assert!(out.join("bin/timetrax").is_file());
}

#[rstest]
fn broken_zsh_fails_with_install_category(checkout: Option<Checkout>) {
    let Some(checkout) = checkout else { return };
    let executor = ScriptCargo { script: BROKEN_ZSH };

    let err = package(&checkout.context, &executor, &mut Vec::new()).expect_err("zsh fails");

    assert_eq!(err.category(), ErrorCategory::Install);
    let PackagerError::CompletionFailed(failures) = &err else {
        panic!("expected completion failure, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0].kind,
        CompletionFailureKind::ExitStatus { code: Some(3), stderr } if stderr.contains("not implemented")
    ));
    assert!(!manifest_path(&checkout.context.output_root).exists());
    assert!(verify_output_tree(&checkout.context.output_root).is_err());
}

#[rstest]
fn hanging_generator_is_killed(checkout: Option<Checkout>) {
    let Some(mut checkout) = checkout else { return };
    checkout.context.completions = CompletionConfig {
        timeout: Duration::from_secs(1),
        retries: 1,
        policy: FailurePolicy::Aggregate,
    };
    let executor = ScriptCargo { script: HANGS_ON_FISH };

    let err = package(&checkout.context, &executor, &mut Vec::new()).expect_err("fish hangs");

    assert_eq!(err.failed_shells(), vec![Shell::Fish]);
    let PackagerError::CompletionFailed(failures) = &err else {
        panic!("expected completion failure, got {err:?}");
    };
    assert!(matches!(failures[0].kind, CompletionFailureKind::TimedOut { .. }));
    assert!(Shell::Bash.install_path(&checkout.context.output_root).is_file());
}
