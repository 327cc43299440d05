//! timetrax packager CLI entrypoint.
//!
//! Parses arguments, installs the log subscriber, and dispatches to the
//! pipeline. Failures are printed as `error[<category>]: <message>` and the
//! process exits with the category's status code.

use clap::Parser;
use serde::Serialize;
use std::io::Write;
use timetrax_packager::cli::{Cli, Command, InstallCompletionsArgs, PackageArgs, TargetsArgs};
use timetrax_packager::config::PackagerConfig;
use timetrax_packager::error::{PackagerError, Result};
use timetrax_packager::exec::SystemCommandExecutor;
use timetrax_packager::manifest::verify_output_tree;
use timetrax_packager::output::write_stderr_line;
use timetrax_packager::pipeline::{dry_run, install_only, package};
use timetrax_packager::target::BuildTarget;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity, cli.quiet);
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<()> {
    match &cli.command {
        Command::Package(args) => run_package(args, cli, stderr),
        Command::InstallCompletions(args) => run_install_completions(args, cli.quiet, stderr),
        Command::Verify(args) => {
            let manifest = verify_output_tree(&args.out)?;
            if !cli.quiet {
                write_stderr_line(
                    stderr,
                    format!(
                        "{} is complete: timetrax for {} with {} completion scripts",
                        args.out,
                        manifest.provenance.target,
                        manifest.completions.len()
                    ),
                );
            }
            Ok(())
        }
        Command::Targets(args) => run_targets(args, &mut std::io::stdout().lock()),
    }
}

fn run_package(args: &PackageArgs, cli: &Cli, stderr: &mut dyn Write) -> Result<()> {
    let config = args.load_config()?;
    let context = args.pipeline_context(&config, cli.verbosity, cli.quiet)?;

    if args.dry_run {
        return dry_run(&context, stderr);
    }
    package(&context, &SystemCommandExecutor, stderr)?;
    Ok(())
}

fn run_install_completions(
    args: &InstallCompletionsArgs,
    quiet: bool,
    stderr: &mut dyn Write,
) -> Result<()> {
    let config = PackagerConfig::load(args.config.as_deref(), None)?;
    let context = args.install_context(&config, quiet)?;
    install_only(&context, &SystemCommandExecutor, stderr)?;
    Ok(())
}

#[derive(Serialize)]
struct TargetEntry {
    target: BuildTarget,
    rust_triple: &'static str,
    host: bool,
}

/// Lists supported targets on stdout.
fn run_targets(args: &TargetsArgs, stdout: &mut dyn Write) -> Result<()> {
    let entries: Vec<TargetEntry> = BuildTarget::ALL
        .into_iter()
        .map(|target| TargetEntry {
            target,
            rust_triple: target.rust_triple(),
            host: target.runs_on_host(),
        })
        .collect();

    let text = if args.json {
        serde_json::to_string_pretty(&entries)?
    } else {
        entries
            .iter()
            .map(|entry| {
                let marker = if entry.host { "  (host)" } else { "" };
                format!("{:<16} {}{marker}", entry.target.identifier(), entry.rust_triple)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    writeln!(stdout, "{text}").map_err(|source| PackagerError::WriteFailed { source })
}

/// Default filter directive for the given flags; `RUST_LOG` overrides it.
fn default_log_filter(verbosity: u8, quiet: bool) -> String {
    let level = match (quiet, verbosity) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    format!("warn,timetrax_packager={level}")
}

/// Install the stderr subscriber, returning false when one already exists.
fn init_logging(verbosity: u8, quiet: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(verbosity, quiet)));
    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init()
    {
        Ok(()) => true,
        Err(err) => {
            log::debug!("keeping the existing log subscriber: {err}");
            false
        }
    }
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            let category = err.category();
            write_stderr_line(stderr, format!("error[{category}]: {err}"));
            category.exit_code()
        }
    }
}
