use camino::Utf8PathBuf;
use globset::{Glob, GlobMatcher};
use std::fs;

use crate::probe::ProbeError;

/// Expand a glob pattern to the sorted list of matching files.
///
/// The pattern's directory part must be literal (wildcards are supported in
/// the file name only), which is all the UI's movie/mdoc fields need.
pub fn expand_glob(pattern: &str) -> Result<Vec<Utf8PathBuf>, ProbeError> {
    let (dir, file_pattern) = match pattern.rsplit_once('/') {
        Some((dir, file)) => (Utf8PathBuf::from(dir), file),
        None => (Utf8PathBuf::from("."), pattern),
    };
    if file_pattern.is_empty() {
        return Err(ProbeError::BadPattern {
            pattern: pattern.to_string(),
            reason: "pattern names a directory, not files".to_string(),
        });
    }
    if dir.as_str().contains('*') || dir.as_str().contains('?') {
        return Err(ProbeError::BadPattern {
            pattern: pattern.to_string(),
            reason: "wildcards are only supported in the file name".to_string(),
        });
    }
    let matcher: GlobMatcher = Glob::new(file_pattern)
        .map_err(|e| ProbeError::BadPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?
        .compile_matcher();

    let entries = fs::read_dir(dir.as_std_path()).map_err(|e| ProbeError::Io {
        path: dir.to_string(),
        reason: e.to_string(),
    })?;

    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ProbeError::Io {
            path: dir.to_string(),
            reason: e.to_string(),
        })?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if matcher.is_match(&name) && entry.path().is_file() {
            matches.push(dir.join(&name));
        }
    }
    matches.sort();
    Ok(matches)
}
