//! Atomic file replacement.
//!
//! Files in the output tree are written to a temporary sibling and renamed
//! into place, so readers observe either the previous file or the complete
//! new one, never a truncated mix.

use camino::Utf8Path;
use std::fs;
use std::io::{self, Write};
use tempfile::NamedTempFile;

/// Replace `dest` with `contents`.
///
/// # Errors
///
/// Returns an I/O error if the temporary file cannot be created, written,
/// or renamed over `dest`.
pub fn write_atomic(dest: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = temp_sibling(dest)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    persist(tmp, dest)
}

/// Replace `dest` with a copy of `src`, marking it executable on Unix.
///
/// # Errors
///
/// Returns an I/O error if `src` cannot be read or `dest` cannot be replaced.
pub fn copy_executable_atomic(src: &Utf8Path, dest: &Utf8Path) -> io::Result<()> {
    let mut tmp = temp_sibling(dest)?;
    let mut source = fs::File::open(src)?;
    io::copy(&mut source, &mut tmp)?;
    tmp.as_file().sync_all()?;
    set_executable(tmp.as_file())?;
    persist(tmp, dest)
}

fn temp_sibling(dest: &Utf8Path) -> io::Result<NamedTempFile> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    tempfile::Builder::new()
        .prefix(".timetrax-packager-")
        .tempfile_in(dir)
}

fn persist(tmp: NamedTempFile, dest: &Utf8Path) -> io::Result<()> {
    tmp.persist(dest).map(drop).map_err(|e| e.error)
}

#[cfg(unix)]
fn set_executable(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_file: &fs::File) -> io::Result<()> {
    Ok(())
}
