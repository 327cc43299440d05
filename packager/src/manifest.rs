//! Package manifest for a completed output tree.
//!
//! `share/timetrax/manifest.json` is the record that an output tree is a
//! complete package. The pipeline removes it before touching anything else
//! and writes it last, only after the executable and every completion script
//! are in place, so a tree without a manifest is by definition incomplete.
//! [`verify_output_tree`] is the consumer-side check.
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "program": "timetrax",
//!   "target": "x86_64-linux",
//!   "rust_triple": "x86_64-unknown-linux-gnu",
//!   "toolchain": "1.85.0",
//!   "source_identity": "…",
//!   "executable": { "path": "bin/timetrax", "sha256": "…" },
//!   "completions": [
//!     { "shell": "bash", "path": "share/bash-completion/completions/timetrax", "sha256": "…" }
//!   ]
//! }
//! ```

use crate::PROGRAM_NAME;
use crate::atomic::write_atomic;
use crate::completion::InstalledCompletions;
use crate::digest::Sha256Digest;
use crate::error::{PackagerError, Result};
use crate::shell::Shell;
use crate::target::BuildTarget;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// Current manifest schema version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Manifest location relative to the output root.
pub const MANIFEST_RELATIVE_PATH: &str = "share/timetrax/manifest.json";

/// Executable location relative to the output root.
pub const EXECUTABLE_RELATIVE_PATH: &str = "bin/timetrax";

/// What the package was built from and for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestProvenance {
    /// Program name; always `timetrax`.
    pub program: String,
    /// Target platform identifier.
    pub target: BuildTarget,
    /// Rust target triple for `target`.
    pub rust_triple: String,
    /// Pinned toolchain channel, absent for the ambient toolchain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<String>,
    /// Source identity digest, absent when only completions were installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_identity: Option<Sha256Digest>,
}

impl ManifestProvenance {
    /// Provenance for `target` with no recorded inputs.
    #[must_use]
    pub fn for_target(target: BuildTarget) -> Self {
        Self {
            program: PROGRAM_NAME.to_owned(),
            target,
            rust_triple: target.rust_triple().to_owned(),
            toolchain: None,
            source_identity: None,
        }
    }
}

/// A file recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path relative to the output root, `/`-separated.
    pub path: String,
    /// SHA-256 of the file contents.
    pub sha256: Sha256Digest,
}

/// A completion script recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCompletion {
    /// The shell the script is for.
    pub shell: Shell,
    /// Path relative to the output root, `/`-separated.
    pub path: String,
    /// SHA-256 of the script.
    pub sha256: Sha256Digest,
}

/// The manifest written to `share/timetrax/manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Manifest schema version.
    pub schema_version: u32,
    /// Build provenance.
    #[serde(flatten)]
    pub provenance: ManifestProvenance,
    /// The staged executable.
    pub executable: ManifestFile,
    /// Completion scripts in installation order.
    pub completions: Vec<ManifestCompletion>,
}

impl PackageManifest {
    /// Assemble a manifest from the staged executable's digest and the
    /// installed completion scripts.
    #[must_use]
    pub fn new(
        provenance: ManifestProvenance,
        executable_sha256: Sha256Digest,
        completions: &InstalledCompletions,
    ) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            provenance,
            executable: ManifestFile {
                path: EXECUTABLE_RELATIVE_PATH.to_owned(),
                sha256: executable_sha256,
            },
            completions: completions
                .scripts()
                .iter()
                .map(|script| ManifestCompletion {
                    shell: script.shell,
                    path: script.shell.relative_path().to_owned(),
                    sha256: script.sha256.clone(),
                })
                .collect(),
        }
    }

    fn files(&self) -> impl Iterator<Item = (&str, &Sha256Digest)> {
        std::iter::once((self.executable.path.as_str(), &self.executable.sha256)).chain(
            self.completions
                .iter()
                .map(|c| (c.path.as_str(), &c.sha256)),
        )
    }
}

/// Return the manifest path under `output_root`.
#[must_use]
pub fn manifest_path(output_root: &Utf8Path) -> Utf8PathBuf {
    output_root.join(MANIFEST_RELATIVE_PATH)
}

/// Write `manifest` atomically under `output_root`.
///
/// # Errors
///
/// Returns an error if serialisation fails or the file cannot be written.
pub fn write_manifest(output_root: &Utf8Path, manifest: &PackageManifest) -> Result<Utf8PathBuf> {
    let path = manifest_path(output_root);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut json = serde_json::to_vec_pretty(manifest)?;
    json.push(b'\n');
    write_atomic(&path, &json)?;
    log::info!("wrote package manifest to {path}");
    Ok(path)
}

/// Remove any manifest under `output_root`, marking the tree incomplete.
///
/// Returns whether a manifest was present.
///
/// # Errors
///
/// Returns an I/O error if an existing manifest cannot be removed.
pub fn remove_manifest(output_root: &Utf8Path) -> Result<bool> {
    match fs::remove_file(manifest_path(output_root)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read the manifest under `output_root`.
///
/// # Errors
///
/// Returns [`PackagerError::IncompleteOutput`] if the manifest is absent or
/// has an unknown schema version, and [`PackagerError::Manifest`] if it is
/// not valid JSON for the schema.
pub fn read_manifest(output_root: &Utf8Path) -> Result<PackageManifest> {
    let path = manifest_path(output_root);
    let contents = match fs::read(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(incomplete(output_root, format!("no manifest at {path}")));
        }
        Err(e) => return Err(e.into()),
    };

    let manifest: PackageManifest = serde_json::from_slice(&contents)?;
    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(incomplete(
            output_root,
            format!(
                "unsupported manifest schema version {} (expected {MANIFEST_SCHEMA_VERSION})",
                manifest.schema_version
            ),
        ));
    }
    Ok(manifest)
}

/// Check that `output_root` is a complete package.
///
/// The manifest must exist, list a completion for every supported shell, and
/// every listed file must exist with the recorded digest.
///
/// # Errors
///
/// Returns [`PackagerError::IncompleteOutput`] describing the first problem
/// found.
pub fn verify_output_tree(output_root: &Utf8Path) -> Result<PackageManifest> {
    let manifest = read_manifest(output_root)?;

    if let Some(missing) = Shell::ALL
        .into_iter()
        .find(|shell| !manifest.completions.iter().any(|c| c.shell == *shell))
    {
        return Err(incomplete(
            output_root,
            format!("manifest lists no {missing} completion"),
        ));
    }

    for (relative, expected) in manifest.files() {
        let path = output_root.join(relative);
        let actual = match Sha256Digest::of_file(&path) {
            Ok(digest) => digest,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(incomplete(output_root, format!("{relative} is missing")));
            }
            Err(e) => return Err(e.into()),
        };
        if &actual != expected {
            return Err(incomplete(
                output_root,
                format!(
                    "{relative} has digest {} but the manifest records {}",
                    actual.short(),
                    expected.short()
                ),
            ));
        }
    }

    Ok(manifest)
}

fn incomplete(output_root: &Utf8Path, reason: String) -> PackagerError {
    PackagerError::IncompleteOutput {
        path: output_root.to_owned(),
        reason,
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
