//! Download artifacts: a single memory file, or a gzipped tarball of all of
//! them.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chatmem_store::files::{list_memory_files, resolve_file_name};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use crate::ExportError;

/// Fixed file name of the bulk archive, written into the memory directory.
pub const ARCHIVE_NAME: &str = "all_memory_dbs.tar.gz";

/// Resolve `name` to an existing memory file inside `dir`.
///
/// # Errors
///
/// [`ExportError::Store`] for names that escape the directory,
/// [`ExportError::NotFound`] when no such memory file exists.
pub fn prepare_single(dir: &Path, name: &str) -> Result<PathBuf, ExportError> {
    let file = resolve_file_name(name)?;
    let path = dir.join(&file);
    if !path.is_file() {
        return Err(ExportError::NotFound(file));
    }
    Ok(path)
}

/// Pack every memory file in `dir` into [`ARCHIVE_NAME`] and return its path.
///
/// Entries are stored under their bare file names.  The archive is written
/// to a temporary name first and renamed into place, so a concurrent
/// download never sees a half-written tarball.  Files that disappear between
/// listing and packing are skipped.
pub fn build_archive(dir: &Path) -> Result<PathBuf, ExportError> {
    let names = list_memory_files(dir)?;
    let final_path = dir.join(ARCHIVE_NAME);
    let partial_path = dir.join(format!("{ARCHIVE_NAME}.partial"));

    let encoder = GzEncoder::new(File::create(&partial_path)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut packed = 0usize;
    for name in &names {
        match builder.append_path_with_name(dir.join(name), name) {
            Ok(()) => packed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = %name, "memory file vanished before packing");
            }
            Err(e) => return Err(e.into()),
        }
    }
    builder.into_inner()?.finish()?;
    fs::rename(&partial_path, &final_path)?;

    info!(path = %final_path.display(), files = packed, "memory archive built");
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Read;

    fn archive_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let decoder = flate2::read::GzDecoder::new(File::open(path).unwrap());
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mut body = Vec::new();
                entry.read_to_end(&mut body).unwrap();
                (name, body)
            })
            .collect()
    }

    #[test]
    fn archive_contains_only_memory_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.db"), b"alpha").unwrap();
        fs::write(dir.path().join("b.db"), b"bravo").unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a memory").unwrap();

        let path = build_archive(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(ARCHIVE_NAME));
        assert!(!dir.path().join(format!("{ARCHIVE_NAME}.partial")).exists());

        let entries = archive_entries(&path);
        let names: HashSet<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, HashSet::from(["a.db", "b.db"]));
        let alpha = entries.iter().find(|(n, _)| n == "a.db").unwrap();
        assert_eq!(alpha.1, b"alpha");
    }

    #[test]
    fn rebuilding_replaces_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.db"), b"one").unwrap();
        build_archive(dir.path()).unwrap();
        fs::write(dir.path().join("c.db"), b"two").unwrap();
        let path = build_archive(dir.path()).unwrap();
        assert_eq!(archive_entries(&path).len(), 2);
    }

    #[test]
    fn prepare_single_resolves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("work.db"), b"").unwrap();
        assert_eq!(prepare_single(dir.path(), "work").unwrap(), dir.path().join("work.db"));
        assert_eq!(prepare_single(dir.path(), "work.db").unwrap(), dir.path().join("work.db"));
    }

    #[test]
    fn prepare_single_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = prepare_single(dir.path(), "ghost").unwrap_err();
        assert!(matches!(err, ExportError::NotFound(ref name) if name == "ghost.db"));
    }

    #[test]
    fn prepare_single_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let err = prepare_single(dir.path(), "../secret").unwrap_err();
        assert!(matches!(err, ExportError::Store(_)));
    }
}
