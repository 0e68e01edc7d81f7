//! Writing generated files to their output directories.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::export::Files;

/// Extensions of generated C files.
pub const C_EXTENSIONS: &[&str] = &["c", "h"];

/// Extensions of generated CSV files.
pub const CSV_EXTENSIONS: &[&str] = &["csv"];

/// Extensions of generated configuration snapshots.
pub const CFG_EXTENSIONS: &[&str] = &["yaml", "json"];

/// Prefix every generated file name starts with.
const GENERATED_PREFIX: &str = "mm_";

fn is_generated(path: &Path, extensions: &[&str]) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(GENERATED_PREFIX));
    let ext_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e));
    name_matches && ext_matches && path.is_file()
}

/// Delete previously generated files with one of `extensions` from `dir`.
///
/// Returns the number of files removed.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed or a file cannot be
/// removed.
pub fn clean_dir(dir: &Path, extensions: &[&str]) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if is_generated(&path, extensions) {
            debug!("Removing {}", path.display());
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Write `files` into `dir`, creating it if needed.
///
/// With `clean`, generated files with one of `extensions` are deleted first.
/// Returns the paths written.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or cleaned, or a file
/// cannot be written.
pub fn write_files(
    files: &Files,
    dir: &Path,
    clean: bool,
    extensions: &[&str],
) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        info!("Creating directory {}", dir.display());
        std::fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    if clean {
        let removed = clean_dir(dir, extensions)?;
        info!(removed, "Cleaned {}", dir.display());
    }

    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files {
        let path = dir.join(name);
        std::fs::write(&path, contents).map_err(|source| Error::FileWrite {
            path: path.clone(),
            source,
        })?;
        debug!("Wrote {}", path.display());
        written.push(path);
    }
    info!(count = written.len(), "Wrote files to {}", dir.display());
    Ok(written)
}
