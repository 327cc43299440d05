//! Packager configuration file.
//!
//! Settings live in `timetrax-packager.toml`, either at an explicit path or
//! at the root of the source tree. Every key is optional; command-line flags
//! override the file and the file overrides built-in defaults.
//!
//! ```toml
//! [build]
//! target = "x86_64-linux"
//! jobs = 4
//! source_date_epoch = 1
//! verify_reproducible = false
//!
//! [completions]
//! timeout_secs = 30
//! retries = 1
//! failure_policy = "aggregate"
//! ```

use crate::completion::FailurePolicy;
use crate::error::{PackagerError, Result};
use crate::target::BuildTarget;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

/// File name looked up at the source root when no path is given.
pub const CONFIG_FILE_NAME: &str = "timetrax-packager.toml";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PackagerConfig {
    /// Compilation settings.
    pub build: BuildSection,
    /// Completion generation settings.
    pub completions: CompletionSection,
}

/// The `[build]` table.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    /// Target platform used when neither `--target` nor `TIMETRAX_TARGET`
    /// is given.
    pub target: Option<BuildTarget>,
    /// Parallel cargo jobs.
    pub jobs: Option<usize>,
    /// Value exported as `SOURCE_DATE_EPOCH`.
    pub source_date_epoch: Option<u64>,
    /// Build twice and compare digests.
    pub verify_reproducible: bool,
}

/// The `[completions]` table.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionSection {
    /// Seconds allowed per completion invocation.
    pub timeout_secs: Option<u64>,
    /// Extra attempts after a spawn failure.
    pub retries: Option<u32>,
    /// Failure handling across shells.
    pub failure_policy: Option<FailurePolicy>,
}

impl PackagerConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `<source_root>/`
    /// [`CONFIG_FILE_NAME`] is read when present and defaults are used
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::InvalidConfig`] if the file is missing (when
    /// explicit), unreadable, or does not match the schema.
    pub fn load(explicit: Option<&Utf8Path>, source_root: Option<&Utf8Path>) -> Result<Self> {
        let path = match (explicit, source_root) {
            (Some(path), _) => path.to_owned(),
            (None, Some(root)) => {
                let candidate = root.join(CONFIG_FILE_NAME);
                if !candidate.is_file() {
                    return Ok(Self::default());
                }
                candidate
            }
            (None, None) => return Ok(Self::default()),
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| invalid(&path, e.to_string()))?;
        let config = Self::parse(&contents).map_err(|reason| invalid(&path, reason))?;
        log::debug!("loaded configuration from {path}");
        Ok(config)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns the parser's message when the text does not match the schema.
    pub fn parse(contents: &str) -> std::result::Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.message().to_owned())
    }
}

fn invalid(path: &Utf8PathBuf, reason: String) -> PackagerError {
    PackagerError::InvalidConfig {
        path: path.clone(),
        reason,
    }
}
