//! Tests for completion generation and installation.

use super::*;
use crate::exec::MockCommandExecutor;
use crate::test_utils::{exit_output, success_output};
use rstest::{fixture, rstest};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const GENERATOR: &str = "/out/bin/timetrax";

struct OutputRoot {
    _dir: TempDir,
    path: Utf8PathBuf,
}

#[fixture]
fn output_root() -> OutputRoot {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 path");
    OutputRoot { _dir: dir, path }
}

fn script_for(shell: &str) -> Vec<u8> {
    format!("# {shell} completion for timetrax\n").into_bytes()
}

/// Returns the `--shell` value of a completion invocation.
fn requested_shell(cmd: &CommandLine) -> String {
    match cmd.arguments() {
        [sub, flag, shell] if sub == "completion" && flag == "--shell" => shell.clone(),
        other => panic!("unexpected invocation: {other:?}"),
    }
}

/// A mock that answers every shell with its script and records requests.
fn recording_executor(log: Arc<Mutex<Vec<String>>>) -> MockCommandExecutor {
    let mut executor = MockCommandExecutor::new();
    executor.expect_run().returning(move |cmd| {
        let shell = requested_shell(cmd);
        log.lock().expect("log lock").push(shell.clone());
        Ok(success_output(&script_for(&shell)))
    });
    executor
}

/// A mock where `failing` exits 1 and every other shell succeeds.
fn executor_failing(failing: &'static str) -> MockCommandExecutor {
    let mut executor = MockCommandExecutor::new();
    executor.expect_run().returning(move |cmd| {
        let shell = requested_shell(cmd);
        if shell == failing {
            Ok(exit_output(1, b"error: invalid value for '--shell'\n"))
        } else {
            Ok(success_output(&script_for(&shell)))
        }
    });
    executor
}

#[rstest]
fn installs_every_shell_byte_for_byte(output_root: OutputRoot) {
    let requested = Arc::new(Mutex::new(Vec::new()));
    let executor = recording_executor(Arc::clone(&requested));
    let installer = CompletionInstaller::new(CompletionConfig::default(), &executor);

    let installed = installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect("install succeeds");

    for shell in Shell::ALL {
        let script = installed.get(shell).expect("script installed");
        let path = shell.install_path(&output_root.path);
        assert_eq!(script.path, path);
        let expected = script_for(shell.identifier());
        assert_eq!(fs::read(&path).expect("read script"), expected);
        assert_eq!(script.sha256, Sha256Digest::of_bytes(&expected));
    }
    assert_eq!(
        *requested.lock().expect("log lock"),
        ["bash", "zsh", "fish"]
    );
}

#[rstest]
fn never_requests_shells_outside_the_supported_set(output_root: OutputRoot) {
    let requested = Arc::new(Mutex::new(Vec::new()));
    let executor = recording_executor(Arc::clone(&requested));
    let installer = CompletionInstaller::new(CompletionConfig::default(), &executor);

    installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect("first install");
    installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect("second install");

    let supported: Vec<_> = Shell::ALL.iter().map(|s| s.identifier()).collect();
    let requested = requested.lock().expect("log lock");
    assert_eq!(requested.len(), 6);
    assert!(requested.iter().all(|s| supported.contains(&s.as_str())));
}

#[rstest]
fn command_carries_timeout_and_shell_flag(output_root: OutputRoot) {
    let executor = MockCommandExecutor::new();
    let config = CompletionConfig {
        timeout: Duration::from_secs(5),
        ..CompletionConfig::default()
    };
    let installer = CompletionInstaller::new(config, &executor);

    let cmd = installer.completion_command(&output_root.path.join("bin/timetrax"), Shell::Zsh);
    assert_eq!(cmd.arguments(), ["completion", "--shell", "zsh"]);
    assert_eq!(cmd.timeout_duration(), Some(Duration::from_secs(5)));
}

#[rstest]
fn aggregate_policy_attempts_every_shell(output_root: OutputRoot) {
    let executor = executor_failing("zsh");
    let installer = CompletionInstaller::new(CompletionConfig::default(), &executor);

    let err = installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect_err("zsh fails");

    assert_eq!(err.failed_shells(), vec![Shell::Zsh]);
    assert_eq!(err.category(), crate::error::ErrorCategory::Install);
    assert!(err.to_string().contains("zsh: exited with status 1"), "{err}");
    assert!(Shell::Bash.install_path(&output_root.path).is_file());
    assert!(Shell::Fish.install_path(&output_root.path).is_file());
    assert!(!Shell::Zsh.install_path(&output_root.path).exists());
}

#[rstest]
fn fail_fast_policy_stops_at_first_failure(output_root: OutputRoot) {
    let mut executor = MockCommandExecutor::new();
    executor
        .expect_run()
        .withf(|cmd| requested_shell(cmd) == "bash")
        .times(1)
        .returning(|_| Ok(exit_output(2, b"")));
    let config = CompletionConfig {
        policy: FailurePolicy::FailFast,
        ..CompletionConfig::default()
    };
    let installer = CompletionInstaller::new(config, &executor);

    let err = installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect_err("bash fails");
    assert_eq!(err.failed_shells(), vec![Shell::Bash]);
}

#[rstest]
fn spawn_failures_are_retried(output_root: OutputRoot) {
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&attempts);
    let mut executor = MockCommandExecutor::new();
    executor.expect_run().returning(move |cmd| {
        let mut n = counter.lock().expect("counter lock");
        *n += 1;
        if *n == 1 {
            return Err(ExecError::Spawn {
                program: cmd.program().to_owned(),
                source: std::io::Error::other("text file busy"),
            });
        }
        Ok(success_output(&script_for(&requested_shell(cmd))))
    });
    let installer = CompletionInstaller::new(CompletionConfig::default(), &executor);

    installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect("retry recovers");
    assert_eq!(*attempts.lock().expect("counter lock"), 4);
}

#[rstest]
fn spawn_failures_beyond_retry_budget_are_reported(output_root: OutputRoot) {
    let mut executor = MockCommandExecutor::new();
    executor.expect_run().times(3).returning(|cmd| {
        Err(ExecError::Spawn {
            program: cmd.program().to_owned(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    });
    let config = CompletionConfig {
        retries: 0,
        ..CompletionConfig::default()
    };
    let installer = CompletionInstaller::new(config, &executor);

    let err = installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect_err("generator missing");
    assert_eq!(err.failed_shells(), Shell::ALL.to_vec());
}

#[rstest]
fn timeouts_are_not_retried(output_root: OutputRoot) {
    let mut executor = MockCommandExecutor::new();
    executor
        .expect_run()
        .withf(|cmd| requested_shell(cmd) == "fish")
        .times(1)
        .returning(|cmd| {
            Err(ExecError::TimedOut {
                program: cmd.program().to_owned(),
                timeout: Duration::from_secs(30),
            })
        });
    executor
        .expect_run()
        .withf(|cmd| requested_shell(cmd) != "fish")
        .times(2)
        .returning(|cmd| Ok(success_output(&script_for(&requested_shell(cmd)))));
    let installer = CompletionInstaller::new(CompletionConfig::default(), &executor);

    let err = installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect_err("fish times out");
    let PackagerError::CompletionFailed(failures) = err else {
        panic!("expected CompletionFailed, got {err:?}");
    };
    assert_eq!(
        failures,
        [CompletionFailure {
            shell: Shell::Fish,
            kind: CompletionFailureKind::TimedOut {
                timeout: Duration::from_secs(30),
            },
        }]
    );
}

#[rstest]
fn rerun_overwrites_existing_scripts(output_root: OutputRoot) {
    for shell in Shell::ALL {
        let path = shell.install_path(&output_root.path);
        fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        fs::write(&path, "stale script from an older release\n").expect("seed");
    }
    let executor = recording_executor(Arc::new(Mutex::new(Vec::new())));
    let installer = CompletionInstaller::new(CompletionConfig::default(), &executor);

    installer
        .install(Utf8Path::new(GENERATOR), &output_root.path)
        .expect("install succeeds");

    for shell in Shell::ALL {
        let contents = fs::read(shell.install_path(&output_root.path)).expect("read");
        assert_eq!(contents, script_for(shell.identifier()));
    }
}

#[test]
fn failure_policy_parses_from_kebab_case() {
    #[derive(Deserialize)]
    struct Wrapper {
        policy: FailurePolicy,
    }
    let parsed: Wrapper = toml::from_str("policy = \"fail-fast\"").expect("parse");
    assert_eq!(parsed.policy, FailurePolicy::FailFast);
    assert_eq!(FailurePolicy::default().to_string(), "aggregate");
}
