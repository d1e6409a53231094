//! Atomic file writes: temp file in the target directory, fsync, rename.
//!
//! A partially written snapshot must never replace a durable one, so every
//! write of project state funnels through here.

use camino::Utf8Path;
use std::fs;
use std::io::{self, Write};
use tempfile::NamedTempFile;

/// Atomically write `content` to `path` via write-temp-then-rename.
///
/// The temporary file is created in the target's parent directory so the
/// final rename never crosses a filesystem boundary.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent.as_std_path())?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path.as_std_path()).map_err(|e| e.error)?;
    Ok(())
}
