//! `Cargo.lock` parsing and pin validation.
//!
//! Every package in the lockfile must be fixed to a content-addressed
//! version: registry packages by their SHA-256 checksum, git packages by a
//! full commit hash. Packages without a `source` live in the source tree
//! itself and are covered by the tree's own identity digest.

use crate::digest::{Sha256Digest, is_sha256_hex};
use crate::error::{PackagerError, Result};
use camino::Utf8Path;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Length of a full git commit hash in hex.
const GIT_COMMIT_HEX_LEN: usize = 40;

/// How a locked package is pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pin {
    /// Lives in the source tree (workspace member or path dependency).
    Local,
    /// Downloaded from a registry and verified against a checksum.
    Registry {
        /// The registry's recorded SHA-256 of the `.crate` file.
        checksum: Sha256Digest,
    },
    /// Checked out from git at an exact commit.
    Git {
        /// Full commit hash.
        commit: String,
    },
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Registry { checksum } => write!(f, "sha256:{}", checksum.short()),
            Self::Git { commit } => write!(f, "git:{}", commit.get(..12).unwrap_or(commit)),
        }
    }
}

/// A package from `Cargo.lock` with a verified pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedPackage {
    /// Package name.
    pub name: String,
    /// Exact version.
    pub version: String,
    /// How the version is fixed.
    pub pin: Pin,
}

/// The verified contents of a `Cargo.lock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedLockfile {
    /// Every locked package, in lockfile order.
    pub packages: Vec<PinnedPackage>,
}

impl PinnedLockfile {
    /// Number of packages fetched from outside the source tree.
    #[must_use]
    pub fn external_count(&self) -> usize {
        self.packages
            .iter()
            .filter(|p| p.pin != Pin::Local)
            .count()
    }
}

#[derive(Debug, Deserialize)]
struct RawLockfile {
    #[serde(default)]
    package: Vec<RawPackage>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    name: String,
    version: String,
    source: Option<String>,
    checksum: Option<String>,
}

/// Read and validate the lockfile at `path`.
///
/// # Errors
///
/// Returns [`PackagerError::LockfileMissing`] if the file does not exist,
/// [`PackagerError::InvalidLockfile`] if it cannot be parsed, and
/// [`PackagerError::UnpinnedDependency`] for the first package without a
/// content-addressed pin.
pub fn read_lockfile(path: &Utf8Path) -> Result<PinnedLockfile> {
    if !path.exists() {
        return Err(PackagerError::LockfileMissing {
            path: path.to_owned(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    parse_lockfile(&contents).map_err(|err| match err {
        PackagerError::InvalidLockfile { reason, .. } => PackagerError::InvalidLockfile {
            path: path.to_owned(),
            reason,
        },
        other => other,
    })
}

/// Parse and validate lockfile contents.
///
/// # Errors
///
/// See [`read_lockfile`]. Parse errors carry an empty path.
pub fn parse_lockfile(contents: &str) -> Result<PinnedLockfile> {
    let raw: RawLockfile = toml::from_str(contents).map_err(|e| PackagerError::InvalidLockfile {
        path: Default::default(),
        reason: e.to_string(),
    })?;

    let packages = raw
        .package
        .iter()
        .map(|package| pin_package(package, &raw.metadata))
        .collect::<Result<Vec<_>>>()?;

    Ok(PinnedLockfile { packages })
}

fn pin_package(package: &RawPackage, metadata: &BTreeMap<String, String>) -> Result<PinnedPackage> {
    let unpinned = |reason: String| PackagerError::UnpinnedDependency {
        name: package.name.clone(),
        version: package.version.clone(),
        reason,
    };

    let pin = match package.source.as_deref() {
        None => Pin::Local,
        Some(source) if source.starts_with("registry+") || source.starts_with("sparse+") => {
            let checksum = package
                .checksum
                .clone()
                .or_else(|| legacy_checksum(package, source, metadata))
                .ok_or_else(|| unpinned(format!("no checksum recorded for {source}")))?;
            if !is_sha256_hex(&checksum) {
                return Err(unpinned(format!("malformed checksum \"{checksum}\"")));
            }
            let checksum =
                Sha256Digest::try_from(checksum).map_err(|e| unpinned(e.to_string()))?;
            Pin::Registry { checksum }
        }
        Some(source) if source.starts_with("git+") => Pin::Git {
            commit: git_commit(source).ok_or_else(|| {
                unpinned(format!("git source {source} is not locked to a full commit"))
            })?,
        },
        Some(source) => return Err(unpinned(format!("unrecognised source kind {source}"))),
    };

    Ok(PinnedPackage {
        name: package.name.clone(),
        version: package.version.clone(),
        pin,
    })
}

/// Look up a checksum in the `[metadata]` table used by version 1 lockfiles.
fn legacy_checksum(
    package: &RawPackage,
    source: &str,
    metadata: &BTreeMap<String, String>,
) -> Option<String> {
    let key = format!("checksum {} {} ({source})", package.name, package.version);
    metadata.get(&key).cloned()
}

fn git_commit(source: &str) -> Option<String> {
    let (_, fragment) = source.rsplit_once('#')?;
    let is_full_hash = fragment.len() == GIT_COMMIT_HEX_LEN
        && fragment.chars().all(|c| c.is_ascii_hexdigit());
    is_full_hash.then(|| fragment.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CHECKSUM: &str = "3b7fbf1bbc7e6ef4cbb6d87c7e38ec5a3a34b7c9f0d1e2f3a4b5c6d7e8f90a1b";

    fn lockfile_with(entry: &str) -> String {
        format!(
            "version = 4\n\n[[package]]\nname = \"timetrax\"\nversion = \"0.1.0\"\n\n{entry}"
        )
    }

    #[test]
    fn workspace_members_are_local() {
        let lock = parse_lockfile(&lockfile_with("")).expect("valid lockfile");
        assert_eq!(lock.packages.len(), 1);
        assert_eq!(lock.packages.first().map(|p| &p.pin), Some(&Pin::Local));
        assert_eq!(lock.external_count(), 0);
    }

    #[test]
    fn registry_package_with_checksum_is_pinned() {
        let entry = format!(
            "[[package]]\nname = \"clap\"\nversion = \"4.5.38\"\nsource = \"registry+https://github.com/rust-lang/crates.io-index\"\nchecksum = \"{CHECKSUM}\"\n"
        );
        let lock = parse_lockfile(&lockfile_with(&entry)).expect("valid lockfile");
        let clap = lock.packages.get(1).expect("clap entry");
        assert!(matches!(&clap.pin, Pin::Registry { checksum } if checksum.as_str() == CHECKSUM));
        assert_eq!(lock.external_count(), 1);
    }

    #[test]
    fn sparse_registry_is_accepted() {
        let entry = format!(
            "[[package]]\nname = \"uuid\"\nversion = \"1.6.0\"\nsource = \"sparse+https://index.crates.io/\"\nchecksum = \"{CHECKSUM}\"\n"
        );
        assert!(parse_lockfile(&lockfile_with(&entry)).is_ok());
    }

    #[test]
    fn legacy_metadata_checksum_is_accepted() {
        let source = "registry+https://github.com/rust-lang/crates.io-index";
        let contents = format!(
            "[[package]]\nname = \"log\"\nversion = \"0.4.28\"\nsource = \"{source}\"\n\n[metadata]\n\"checksum log 0.4.28 ({source})\" = \"{CHECKSUM}\"\n"
        );
        let lock = parse_lockfile(&contents).expect("valid v1 lockfile");
        assert_eq!(lock.external_count(), 1);
    }

    #[rstest]
    #[case::missing_checksum(
        "[[package]]\nname = \"clap\"\nversion = \"4.5.38\"\nsource = \"registry+https://github.com/rust-lang/crates.io-index\"\n",
        "no checksum"
    )]
    #[case::malformed_checksum(
        "[[package]]\nname = \"clap\"\nversion = \"4.5.38\"\nsource = \"registry+https://github.com/rust-lang/crates.io-index\"\nchecksum = \"abc\"\n",
        "malformed checksum"
    )]
    #[case::git_branch(
        "[[package]]\nname = \"chrono\"\nversion = \"0.4.0\"\nsource = \"git+https://github.com/chronotope/chrono?branch=main\"\n",
        "full commit"
    )]
    #[case::git_short_hash(
        "[[package]]\nname = \"chrono\"\nversion = \"0.4.0\"\nsource = \"git+https://github.com/chronotope/chrono?branch=main#abc1234\"\n",
        "full commit"
    )]
    #[case::unknown_source(
        "[[package]]\nname = \"odd\"\nversion = \"1.0.0\"\nsource = \"directory+/vendor\"\n",
        "unrecognised source"
    )]
    fn rejects_unpinned_packages(#[case] entry: &str, #[case] reason: &str) {
        let err = parse_lockfile(&lockfile_with(entry)).expect_err("entry is not pinned");
        assert!(
            matches!(err, PackagerError::UnpinnedDependency { .. }),
            "expected UnpinnedDependency, got {err:?}"
        );
        assert!(err.to_string().contains(reason), "message: {err}");
    }

    #[test]
    fn git_package_with_full_commit_is_pinned() {
        let commit = "0123456789abcdef0123456789abcdef01234567";
        let entry = format!(
            "[[package]]\nname = \"chrono\"\nversion = \"0.4.0\"\nsource = \"git+https://github.com/chronotope/chrono?rev={commit}#{commit}\"\n"
        );
        let lock = parse_lockfile(&lockfile_with(&entry)).expect("pinned git dep");
        let chrono = lock.packages.get(1).expect("chrono entry");
        assert_eq!(chrono.pin, Pin::Git { commit: commit.to_owned() });
        assert_eq!(chrono.pin.to_string(), "git:0123456789ab");
    }

    #[test]
    fn read_lockfile_reports_missing_file() {
        let err = read_lockfile(Utf8Path::new("/nonexistent/Cargo.lock"))
            .expect_err("missing lockfile");
        assert!(matches!(err, PackagerError::LockfileMissing { .. }));
    }

    #[test]
    fn read_lockfile_attaches_path_to_parse_errors() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = camino::Utf8PathBuf::try_from(dir.path().join("Cargo.lock")).expect("utf-8");
        std::fs::write(&path, "[[package]\nname = ").expect("write lockfile");

        let err = read_lockfile(&path).expect_err("invalid lockfile");
        assert!(
            matches!(&err, PackagerError::InvalidLockfile { path: p, .. } if *p == path),
            "got {err:?}"
        );
    }
}
