//! Supported shells and their completion install locations.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A shell that timetrax ships completions for.
///
/// The set is closed: the installer only ever passes these identifiers to
/// the artifact's `completion --shell` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    /// GNU Bash via `bash-completion`.
    Bash,
    /// Z shell via `site-functions`.
    Zsh,
    /// fish via vendor completions.
    Fish,
}

impl Shell {
    /// Every supported shell, in installation order.
    pub const ALL: [Self; 3] = [Self::Bash, Self::Zsh, Self::Fish];

    /// Return the identifier passed to `completion --shell`.
    #[must_use]
    pub const fn identifier(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
        }
    }

    /// Return the install path relative to the output root.
    ///
    /// # Examples
    ///
    /// ```
    /// use timetrax_packager::shell::Shell;
    ///
    /// assert_eq!(
    ///     Shell::Zsh.relative_path(),
    ///     "share/zsh/site-functions/_timetrax"
    /// );
    /// ```
    #[must_use]
    pub const fn relative_path(self) -> &'static str {
        match self {
            Self::Bash => "share/bash-completion/completions/timetrax",
            Self::Zsh => "share/zsh/site-functions/_timetrax",
            Self::Fish => "share/fish/vendor_completions.d/timetrax.fish",
        }
    }

    /// Return the absolute install path under `output_root`.
    #[must_use]
    pub fn install_path(self, output_root: &Utf8Path) -> Utf8PathBuf {
        output_root.join(self.relative_path())
    }

    /// Return the arguments that ask the artifact for this shell's script.
    #[must_use]
    pub const fn completion_args(self) -> [&'static str; 3] {
        ["completion", "--shell", self.identifier()]
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
