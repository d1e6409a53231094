use camino::Utf8Path;
use std::fs;

use crate::error::ProjectError;

/// Subdirectories every project root carries.
pub const LAYOUT_DIRS: &[&str] = &["Schemes", "Logs", "frames", "mdoc", "qsub"];

/// Create the project layout at `root`. An existing root is refused; a
/// project is created once and loaded thereafter.
pub fn create_layout(root: &Utf8Path) -> Result<(), ProjectError> {
    if root.exists() {
        return Err(ProjectError::Exists {
            path: root.to_string(),
        });
    }
    for dir in LAYOUT_DIRS {
        let path = root.join(dir);
        fs::create_dir_all(path.as_std_path()).map_err(|e| ProjectError::Io {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
