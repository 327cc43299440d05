//! Human-readable progress and summary output.
//!
//! Progress lines go to stderr so that stdout stays free for machine-readable
//! output such as `targets --json`.

use crate::completion::CompletionConfig;
use crate::target::BuildTarget;
use camino::Utf8Path;
use std::io::Write;

/// Write one line to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort progress output; ignore write failures.
    }
}

/// Format a success message after packaging.
#[must_use]
pub fn success_message(target: BuildTarget, completions: usize, output_root: &Utf8Path) -> String {
    let plural = if completions == 1 { "script" } else { "scripts" };
    format!("Packaged timetrax for {target} with {completions} completion {plural} in {output_root}")
}

/// Configuration information for dry-run output.
///
/// # Example
///
/// ```
/// use camino::Utf8PathBuf;
/// use timetrax_packager::completion::CompletionConfig;
/// use timetrax_packager::output::DryRunInfo;
/// use timetrax_packager::target::BuildTarget;
///
/// let source = Utf8PathBuf::from("/src/timetrax");
/// let out = Utf8PathBuf::from("/dist");
/// let scratch = Utf8PathBuf::from("/src/timetrax/target/timetrax-packager");
///
/// let info = DryRunInfo {
///     source_root: &source,
///     output_root: &out,
///     scratch_dir: &scratch,
///     target: BuildTarget::X86_64Linux,
///     generator_target: Some(BuildTarget::X86_64Linux),
///     toolchain: Some("1.85.0"),
///     source_identity: None,
///     jobs: None,
///     source_date_epoch: 1,
///     verify_reproducible: false,
///     completions: CompletionConfig::default(),
/// };
///
/// let output = info.display_text();
/// assert!(output.contains("Dry run"));
/// assert!(output.contains("x86_64-unknown-linux-gnu"));
/// ```
#[derive(Debug)]
pub struct DryRunInfo<'a> {
    /// Source tree root.
    pub source_root: &'a Utf8Path,
    /// Output tree root.
    pub output_root: &'a Utf8Path,
    /// Scratch directory for intermediate build output.
    pub scratch_dir: &'a Utf8Path,
    /// Requested target.
    pub target: BuildTarget,
    /// Target of the executable that will generate completions, or `None`
    /// when no runnable build exists for this host.
    pub generator_target: Option<BuildTarget>,
    /// Pinned toolchain channel, `None` for the ambient toolchain.
    pub toolchain: Option<&'a str>,
    /// Source identity digest, when it could be computed.
    pub source_identity: Option<&'a str>,
    /// Optional parallel job count.
    pub jobs: Option<usize>,
    /// `SOURCE_DATE_EPOCH` exported to the build.
    pub source_date_epoch: u64,
    /// Whether the build will be repeated and compared.
    pub verify_reproducible: bool,
    /// Completion generation settings.
    pub completions: CompletionConfig,
}

impl DryRunInfo<'_> {
    /// Format the dry-run information for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        let mut lines = vec![
            "Dry run - no files will be modified".to_owned(),
            String::new(),
            format!("Source root: {}", self.source_root),
            format!("Output root: {}", self.output_root),
            format!("Scratch directory: {}", self.scratch_dir),
            format!("Target: {} ({})", self.target, self.target.rust_triple()),
            format!("Toolchain: {}", self.toolchain.unwrap_or("ambient")),
        ];

        match self.generator_target {
            Some(generator) if generator == self.target => {
                lines.push("Completion generator: target artifact".to_owned());
            }
            Some(generator) => {
                lines.push(format!("Completion generator: host build for {generator}"));
            }
            None => lines.push("Completion generator: unavailable on this host".to_owned()),
        }

        if let Some(identity) = self.source_identity {
            lines.push(format!("Source identity: {identity}"));
        }
        if let Some(jobs) = self.jobs {
            lines.push(format!("Parallel jobs: {jobs}"));
        }
        lines.push(format!("SOURCE_DATE_EPOCH: {}", self.source_date_epoch));
        lines.push(format!("Verify reproducible: {}", self.verify_reproducible));
        lines.push(format!(
            "Completion timeout: {}s, retries: {}, policy: {}",
            self.completions.timeout.as_secs(),
            self.completions.retries,
            self.completions.policy
        ));

        lines.join("\n")
    }
}
