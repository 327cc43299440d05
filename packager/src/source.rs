//! Source tree discovery and identity hashing.
//!
//! The source identity is a SHA-256 over every file's path relative to the
//! tree root and its contents, visited in sorted order. Two checkouts of the
//! same revision therefore hash identically regardless of where they live on
//! disk or in which order the filesystem lists them.

use crate::digest::Sha256Digest;
use crate::error::{PackagerError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;

/// Directory names never included in the identity.
const IGNORED_DIRS: &[&str] = &["target", ".git", ".hg", ".jj", ".svn"];

/// Cargo configuration files inside a checkout, in the order cargo reads them.
const CARGO_CONFIG_FILES: &[&str] = &[".cargo/config.toml", ".cargo/config"];

/// A timetrax source checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    root: Utf8PathBuf,
}

impl SourceTree {
    /// Open the source tree rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::SourceNotFound`] if `root` has no
    /// `Cargo.toml`.
    pub fn open(root: &Utf8Path) -> Result<Self> {
        let manifest = root.join("Cargo.toml");
        if !manifest.is_file() {
            return Err(PackagerError::SourceNotFound { path: manifest });
        }
        Ok(Self {
            root: root.to_owned(),
        })
    }

    /// Root directory of the checkout.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path to the workspace `Cargo.toml`.
    #[must_use]
    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join("Cargo.toml")
    }

    /// Path to the workspace `Cargo.lock`.
    #[must_use]
    pub fn lockfile_path(&self) -> Utf8PathBuf {
        self.root.join("Cargo.lock")
    }

    /// Whether the checkout's own cargo configuration sets `rustflags` under
    /// any `[target.*]` table.
    ///
    /// Cargo ignores `build.rustflags` once a target table supplies flags, so
    /// extra flags must then be added at the target level to take effect.
    /// Unreadable or malformed configuration counts as not declaring any.
    #[must_use]
    pub fn declares_target_rustflags(&self) -> bool {
        CARGO_CONFIG_FILES.iter().any(|name| {
            fs::read_to_string(self.root.join(name))
                .ok()
                .and_then(|contents| contents.parse::<toml::Table>().ok())
                .is_some_and(|table| target_tables_set_rustflags(&table))
        })
    }

    /// Hash the tree, skipping build output, VCS metadata, and every path in
    /// `excluded`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory or file cannot be read, and
    /// [`PackagerError::NonUtf8Path`] for file names that are not UTF-8.
    pub fn identity(&self, excluded: &[Utf8PathBuf]) -> Result<Sha256Digest> {
        let root = self.root.canonicalize_utf8()?;
        // Directories that do not exist yet cannot hide any files.
        let excluded: Vec<Utf8PathBuf> = excluded
            .iter()
            .filter_map(|dir| dir.canonicalize_utf8().ok())
            .collect();
        let mut files = Vec::new();
        collect_files(&root, &excluded, &mut files)?;
        files.sort();

        let mut hasher = Sha256::new();
        for path in &files {
            let relative = path.strip_prefix(&root).unwrap_or(path);
            hasher.update(relative.as_str().as_bytes());
            hasher.update([0]);
            hash_file_into(path, &mut hasher)?;
            hasher.update([0]);
        }
        log::debug!("hashed {} source files under {}", files.len(), self.root);
        Ok(Sha256Digest::from_hasher(hasher))
    }
}

fn collect_files(dir: &Utf8Path, excluded: &[Utf8PathBuf], files: &mut Vec<Utf8PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|path| {
            PackagerError::NonUtf8Path {
                path: path.to_string_lossy().into_owned(),
            }
        })?;
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let ignored = path
                .file_name()
                .is_some_and(|name| IGNORED_DIRS.contains(&name));
            if ignored || excluded.iter().any(|ex| ex == &path) {
                continue;
            }
            collect_files(&path, excluded, files)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn target_tables_set_rustflags(config: &toml::Table) -> bool {
    config
        .get("target")
        .and_then(toml::Value::as_table)
        .is_some_and(|targets| {
            targets.values().any(|entry| {
                entry
                    .as_table()
                    .is_some_and(|entry| entry.contains_key("rustflags"))
            })
        })
}

fn hash_file_into(path: &Utf8Path, hasher: &mut Sha256) -> Result<()> {
    let mut file = fs::File::open(path)?;
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            return Ok(());
        }
        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }
}
