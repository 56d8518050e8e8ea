//! Filesystem helpers shared by the worker, discovery and integrity check.
use std::{fs, io, path::Path};

/// Remove a file if it exists; missing files are not an error.
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Delete a file or a directory tree, whichever is present at `path`.
pub fn delete_file_or_dir(path: &Path) -> io::Result<()> {
    if path.is_file() {
        fs::remove_file(path)?;
    } else if path.is_dir() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Move a file, falling back to copy-then-remove when rename fails
/// (e.g. across filesystems).
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Restore a file via copy-then-remove. Copying first avoids permission
/// errors when the destination parent is read-only to renames.
pub fn copy_back(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to)?;
    fs::remove_file(from)
}
