//! Pinned Rust toolchain detection.
//!
//! A source tree may pin its compiler through `rust-toolchain.toml` or the
//! older extensionless `rust-toolchain` file, which holds either a bare
//! channel name or the same TOML. rustup prefers the extensionless file when
//! both exist, and so does detection here. A pinned channel must name an
//! exact release or a dated nightly: floating channels would let two builds
//! of the same source use different compilers.

use crate::error::{PackagerError, Result};
use camino::Utf8Path;

/// Channel names that resolve to whatever is newest at build time.
const FLOATING_CHANNELS: &[&str] = &["stable", "beta", "nightly"];

/// Toolchain file names in the order rustup consults them.
pub const TOOLCHAIN_FILES: [&str; 2] = ["rust-toolchain", "rust-toolchain.toml"];

/// A pinned Rust toolchain read from a toolchain file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    channel: String,
}

impl Toolchain {
    /// Detect the pinned toolchain for a source tree.
    ///
    /// Returns `Ok(None)` when the tree has neither toolchain file, in which
    /// case the ambient toolchain is used.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::InvalidToolchainFile`] when the file cannot be
    /// parsed and [`PackagerError::FloatingToolchain`] when it names a
    /// floating channel.
    pub fn detect(source_root: &Utf8Path) -> Result<Option<Self>> {
        let Some(toolchain_path) = TOOLCHAIN_FILES
            .iter()
            .map(|name| source_root.join(name))
            .find(|path| path.is_file())
        else {
            return Ok(None);
        };

        log::debug!("reading toolchain pin from {toolchain_path}");
        let contents = std::fs::read_to_string(&toolchain_path)?;
        if toolchain_path.extension() == Some("toml") {
            parse_toolchain(&contents).map(Some)
        } else {
            parse_legacy_toolchain(&contents).map(Some)
        }
    }

    /// Create a toolchain for an explicit channel without validation.
    #[must_use]
    pub fn with_channel(channel: &str) -> Self {
        Self {
            channel: channel.to_owned(),
        }
    }

    /// Return the channel string.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Return the `+<channel>` argument for cargo invocations.
    #[must_use]
    pub fn cargo_arg(&self) -> String {
        format!("+{}", self.channel)
    }
}

/// Return true when `channel` names a moving release line.
///
/// Bare `stable`, `beta`, and `nightly` float. Host-qualified forms such as
/// `stable-x86_64-unknown-linux-gnu` float too; dated forms
/// (`nightly-2025-09-18`) and versions (`1.85.0`) are pinned.
#[must_use]
pub fn is_floating_channel(channel: &str) -> bool {
    FLOATING_CHANNELS.iter().any(|floating| {
        channel == *floating
            || channel
                .strip_prefix(floating)
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_digit()))
    })
}

/// Parse and validate `rust-toolchain.toml` contents.
///
/// Supports both the `[toolchain].channel` form and a top-level `channel`
/// key.
///
/// # Errors
///
/// Returns an error if the TOML is invalid, no channel is present, or the
/// channel floats.
pub fn parse_toolchain(contents: &str) -> Result<Toolchain> {
    let table: toml::Table =
        contents
            .parse()
            .map_err(|e| PackagerError::InvalidToolchainFile {
                reason: format!("TOML parse error: {e}"),
            })?;

    pinned(parse_channel_from_table(&table)?)
}

/// Parse and validate the contents of an extensionless `rust-toolchain` file.
///
/// A single non-empty line without TOML syntax is the channel itself.
/// Anything else is read as `rust-toolchain.toml`.
///
/// # Errors
///
/// Returns the errors of [`parse_toolchain`], and
/// [`PackagerError::InvalidToolchainFile`] for an empty file.
pub fn parse_legacy_toolchain(contents: &str) -> Result<Toolchain> {
    let mut lines = contents.lines().map(str::trim).filter(|line| !line.is_empty());
    match (lines.next(), lines.next()) {
        (None, _) => Err(PackagerError::InvalidToolchainFile {
            reason: "rust-toolchain is empty".to_owned(),
        }),
        (Some(line), None) if !line.contains(['=', '[']) => pinned(line.to_owned()),
        _ => parse_toolchain(contents),
    }
}

fn pinned(channel: String) -> Result<Toolchain> {
    if is_floating_channel(&channel) {
        return Err(PackagerError::FloatingToolchain { channel });
    }
    Ok(Toolchain { channel })
}

fn parse_channel_from_table(table: &toml::Table) -> Result<String> {
    table
        .get("toolchain")
        .and_then(|t| t.get("channel"))
        .or_else(|| table.get("channel"))
        .and_then(toml::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| PackagerError::InvalidToolchainFile {
            reason: "no channel field found".to_owned(),
        })
}
