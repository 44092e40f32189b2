//! Memory-file naming convention.
//!
//! Every memory file lives directly inside the store directory and carries
//! the [`MEMORY_FILE_EXTENSION`].  User-supplied names are resolved to a bare
//! file name with [`resolve_file_name`]; anything that could point outside the
//! directory is rejected rather than rewritten.

use std::fs;
use std::path::{Component, Path};

use tracing::debug;

use crate::store::StoreError;

/// Extension shared by every memory file (without the leading dot).
pub const MEMORY_FILE_EXTENSION: &str = "db";

/// Resolve a user-supplied memory file name to the bare on-disk file name.
///
/// The extension is appended when missing (`"work"` → `"work.db"`).  Names
/// that are empty, hidden (leading dot), contain a path separator or NUL
/// byte, or are not a single plain path component are rejected with
/// [`StoreError::InvalidPath`].
pub fn resolve_file_name(raw: &str) -> Result<String, StoreError> {
    let name = raw.trim();
    let invalid = || StoreError::InvalidPath(raw.to_string());

    // Hidden names are refused outright; this also covers "." and "..".
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(invalid()),
    }

    if has_memory_extension(name) {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}.{MEMORY_FILE_EXTENSION}"))
    }
}

/// `true` when `name` ends in the memory-file extension.
pub fn has_memory_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == MEMORY_FILE_EXTENSION)
}

/// List the memory files in `dir`, sorted by name.
///
/// Entries that vanish or become unreadable while the directory is being
/// enumerated are skipped.  Only a failure to open the directory itself is an
/// error.
pub fn list_memory_files(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !has_memory_extension(&name) {
            continue;
        }
        // Follows symlinks; a dangling or vanished entry is simply absent.
        match fs::metadata(entry.path()) {
            Ok(meta) if meta.is_file() => names.push(name),
            Ok(_) => {}
            Err(e) => debug!(file = %name, error = %e, "memory file vanished during listing"),
        }
    }
    names.sort();
    Ok(names)
}
