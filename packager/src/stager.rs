//! Staging of the compiled executable into the output tree.
//!
//! The executable lands at `<out>/bin/timetrax`. It is copied through a
//! temporary file and renamed into place, so an interrupted copy never leaves
//! a partially written binary where a package consumer would find it.

use crate::PROGRAM_NAME;
use crate::atomic::copy_executable_atomic;
use crate::builder::Artifact;
use crate::error::{PackagerError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Handles staging of the built executable to the output tree.
pub struct Stager {
    output_root: Utf8PathBuf,
}

impl Stager {
    /// Create a new stager for the given output root.
    #[must_use]
    pub fn new(output_root: Utf8PathBuf) -> Self {
        Self { output_root }
    }

    /// Ensure `bin/` exists and is writable.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::TargetNotWritable`] if the directory cannot
    /// be created or written to.
    pub fn prepare(&self) -> Result<()> {
        let bin_dir = self.bin_dir();
        let not_writable = |e: std::io::Error| PackagerError::TargetNotWritable {
            path: bin_dir.clone(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&bin_dir).map_err(not_writable)?;

        // Verify writability by attempting to create a temp file
        let probe = bin_dir.join(".timetrax-packager-probe");
        fs::write(&probe, b"probe").map_err(not_writable)?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }

    /// Copy `artifact` to `bin/timetrax`, replacing any previous binary.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::StagingFailed`] if the copy fails.
    pub fn stage(&self, artifact: &Artifact) -> Result<Utf8PathBuf> {
        let dest = self.binary_path();
        copy_executable_atomic(&artifact.path, &dest).map_err(|e| {
            PackagerError::StagingFailed {
                reason: format!("failed to copy {} to {dest}: {e}", artifact.path),
            }
        })?;
        log::info!("staged {} to {dest}", artifact.path);
        Ok(dest)
    }

    /// Return the `bin/` directory under the output root.
    #[must_use]
    pub fn bin_dir(&self) -> Utf8PathBuf {
        self.output_root.join("bin")
    }

    /// Return the staged executable path.
    #[must_use]
    pub fn binary_path(&self) -> Utf8PathBuf {
        staged_binary_path(&self.output_root)
    }
}

/// Return where the executable is staged under `output_root`.
#[must_use]
pub fn staged_binary_path(output_root: &Utf8Path) -> Utf8PathBuf {
    output_root.join("bin").join(PROGRAM_NAME)
}
