//! Build target selection.
//!
//! timetrax is packaged for exactly four platforms. Each is a variant of
//! [`BuildTarget`]; adding or removing a platform is a compile-time change.
//! Identifiers use the `<arch>-<os>` form (`x86_64-linux`) and are mapped to
//! the Rust target triple handed to `cargo build --target`.

use crate::error::{PackagerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A supported packaging platform.
///
/// # Examples
///
/// ```
/// use timetrax_packager::target::BuildTarget;
///
/// let target: BuildTarget = "aarch64-darwin".parse().expect("supported target");
/// assert_eq!(target.rust_triple(), "aarch64-apple-darwin");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildTarget {
    /// 64-bit x86 Linux.
    #[serde(rename = "x86_64-linux")]
    X86_64Linux,
    /// 64-bit ARM Linux.
    #[serde(rename = "aarch64-linux")]
    Aarch64Linux,
    /// Apple silicon macOS.
    #[serde(rename = "aarch64-darwin")]
    Aarch64Darwin,
    /// Intel macOS.
    #[serde(rename = "x86_64-darwin")]
    X86_64Darwin,
}

impl BuildTarget {
    /// Every supported target, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::X86_64Linux,
        Self::Aarch64Linux,
        Self::Aarch64Darwin,
        Self::X86_64Darwin,
    ];

    /// Return the platform identifier (`x86_64-linux`, ...).
    #[must_use]
    pub const fn identifier(self) -> &'static str {
        match self {
            Self::X86_64Linux => "x86_64-linux",
            Self::Aarch64Linux => "aarch64-linux",
            Self::Aarch64Darwin => "aarch64-darwin",
            Self::X86_64Darwin => "x86_64-darwin",
        }
    }

    /// Return the Rust target triple used for compilation.
    #[must_use]
    pub const fn rust_triple(self) -> &'static str {
        match self {
            Self::X86_64Linux => "x86_64-unknown-linux-gnu",
            Self::Aarch64Linux => "aarch64-unknown-linux-gnu",
            Self::Aarch64Darwin => "aarch64-apple-darwin",
            Self::X86_64Darwin => "x86_64-apple-darwin",
        }
    }

    /// Return the target matching the platform this packager runs on.
    ///
    /// Returns `None` on hosts outside the supported set (Windows, 32-bit,
    /// and so on). Such hosts can still cross-compile but cannot run the
    /// artifact to generate completions.
    #[must_use]
    pub const fn host() -> Option<Self> {
        if cfg!(all(target_arch = "x86_64", target_os = "linux")) {
            Some(Self::X86_64Linux)
        } else if cfg!(all(target_arch = "aarch64", target_os = "linux")) {
            Some(Self::Aarch64Linux)
        } else if cfg!(all(target_arch = "aarch64", target_os = "macos")) {
            Some(Self::Aarch64Darwin)
        } else if cfg!(all(target_arch = "x86_64", target_os = "macos")) {
            Some(Self::X86_64Darwin)
        } else {
            None
        }
    }

    /// Whether an artifact built for this target runs natively on the host.
    #[must_use]
    pub fn runs_on_host(self) -> bool {
        Self::host() == Some(self)
    }

    /// Comma-separated list of accepted identifiers, for error messages.
    #[must_use]
    pub fn expected_list() -> String {
        Self::ALL
            .iter()
            .map(|t| t.identifier())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for BuildTarget {
    type Err = PackagerError;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.identifier() == value)
            .ok_or_else(|| PackagerError::UnsupportedTarget {
                value: value.to_owned(),
                expected: Self::expected_list(),
            })
    }
}

impl TryFrom<&str> for BuildTarget {
    type Error = PackagerError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
