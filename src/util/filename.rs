//! Database file naming conventions.

use std::path::{Path, PathBuf};

/// Name of the advisory lock file inside the database directory.
pub const LOCK_FILE_NAME: &str = "FLOCK";

/// Extension of WAL segment files.
pub const SEGMENT_FILE_EXT: &str = ".SEG";

/// Reserved extension for future compaction hint files.
#[allow(dead_code)]
pub const HINT_FILE_EXT: &str = ".HINT";

/// Reserved extension for the future merge-finished marker file.
#[allow(dead_code)]
pub const MERGE_FIN_FILE_EXT: &str = ".MERGEFIN";

/// Generate the lock file path.
pub fn lock_file_path(dir_path: &Path) -> PathBuf {
    dir_path.join(LOCK_FILE_NAME)
}

/// Generate a segment file path: nine-digit zero-padded id plus extension.
pub fn segment_file_path(dir_path: &Path, ext: &str, id: u32) -> PathBuf {
    dir_path.join(format!("{:09}{}", id, ext))
}

/// Parse a segment file name and return its numeric id.
///
/// Returns `None` if the name doesn't carry the given extension or the
/// stem isn't a decimal number.
pub fn parse_segment_id(name: &str, ext: &str) -> Option<u32> {
    let stem = name.strip_suffix(ext)?;
    if stem.is_empty() {
        return None;
    }
    stem.parse::<u32>().ok()
}

/// Create a directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
