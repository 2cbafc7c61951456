//! In-place file sealing and opening
//!
//! Sealing `notes.txt` produces `notes.txt.mess` and removes `notes.txt`;
//! opening reverses that. Which of the two happens is decided by the file
//! name alone, never by its contents.
//!
//! The new file is fsynced before the source file is deleted, so a crash
//! leaves at worst both files behind. There is no tempfile + rename step.

use crate::container;
use crate::diagnostics::Diagnostics;
use crate::error::{ErrorCategory, ErrorKind, MessError, Result};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Appended to sealed files, stripped from opened ones
pub const CONTAINER_SUFFIX: &str = ".mess";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Seal,
    Open,
}

impl Operation {
    /// Open if the file name ends with the container suffix, Seal otherwise
    pub fn for_path(path: &Path) -> Self {
        if has_container_suffix(path) {
            Operation::Open
        } else {
            Operation::Seal
        }
    }
}

fn has_container_suffix(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| strip_container_suffix(name).is_some())
}

/// Strip the suffix at the byte level so non-UTF-8 names round-trip
#[cfg(unix)]
fn strip_container_suffix(name: &OsStr) -> Option<&OsStr> {
    use std::os::unix::ffi::OsStrExt;

    name.as_bytes()
        .strip_suffix(CONTAINER_SUFFIX.as_bytes())
        .map(OsStr::from_bytes)
}

#[cfg(not(unix))]
fn strip_container_suffix(name: &OsStr) -> Option<&OsStr> {
    name.to_str()?.strip_suffix(CONTAINER_SUFFIX).map(OsStr::new)
}

/// `notes.txt` becomes `notes.txt.mess`
pub fn container_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(CONTAINER_SUFFIX);
    PathBuf::from(name)
}

/// `notes.txt.mess` becomes `notes.txt`
///
/// Returns `None` if the file name lacks the suffix or consists of nothing
/// but the suffix.
pub fn plaintext_path(path: &Path) -> Option<PathBuf> {
    let stem = strip_container_suffix(path.file_name()?)?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

/// Encrypt the file at `path` into `<path>.mess` and delete `path`
///
/// Returns the path of the container. The container is created with mode
/// 0o600 (read/write for owner only) on Unix systems.
pub fn seal_file(path: &Path, password: &[u8], diag: &dyn Diagnostics) -> Result<PathBuf> {
    let plaintext = Zeroizing::new(fs::read(path).map_err(|e| read_error(path, e))?);
    let sealed = container::seal(password, &plaintext);

    let output_path = container_path(path);
    write_file_synced(&output_path, &sealed)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    remove_source(path)?;

    diag.info("File encrypted");
    Ok(output_path)
}

/// Decrypt the container at `path` into `path` minus `.mess` and delete `path`
///
/// Returns the path of the restored file. On any failure, including a wrong
/// password, the container is left untouched and nothing is written.
pub fn open_file(path: &Path, password: &[u8], diag: &dyn Diagnostics) -> Result<PathBuf> {
    if !path.exists() {
        return Err(MessError::with_kind(
            ErrorCategory::User,
            ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
        ));
    }

    let output_path = plaintext_path(path).ok_or_else(|| {
        MessError::with_kind(
            ErrorCategory::User,
            ErrorKind::MissingSuffix,
            format!("Not an encrypted file: {}", path.display()),
        )
    })?;

    let sealed = fs::read(path).map_err(|e| read_error(path, e))?;
    let plaintext = container::open(password, &sealed)
        .map_err(|e| e.with_context(format!("failed to decrypt {}", path.display())))?;

    write_file_synced(&output_path, &plaintext)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    remove_source(path)?;

    diag.info("File decrypted");
    Ok(output_path)
}

/// Seal or open `path`, whichever its name calls for
pub fn process_file(
    path: &Path,
    password: &[u8],
    diag: &dyn Diagnostics,
) -> Result<(Operation, PathBuf)> {
    let operation = Operation::for_path(path);
    let output_path = match operation {
        Operation::Seal => seal_file(path, password, diag)?,
        Operation::Open => open_file(path, password, diag)?,
    };
    Ok((operation, output_path))
}

/// Write file with secure permissions (0o600 on Unix) and fsync it
fn write_file_synced(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = create_secure(path).map_err(|e| {
        MessError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("failed to open {}", path.display()),
            e,
        )
    })?;

    file.write_all(contents).map_err(|e| {
        MessError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to write {}", path.display()),
            e,
        )
    })?;
    // The source file is deleted right after this returns, so the data
    // must be on disk first.
    file.sync_all().map_err(|e| {
        MessError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to sync {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

#[cfg(unix)]
fn create_secure(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_secure(path: &Path) -> io::Result<fs::File> {
    fs::File::create(path)
}

fn remove_source(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| {
        MessError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to delete {}", path.display()),
            e,
        )
    })
}

fn read_error(path: &Path, err: io::Error) -> MessError {
    if err.kind() == io::ErrorKind::NotFound {
        return MessError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
            err,
        );
    }
    MessError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
