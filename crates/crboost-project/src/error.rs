use crboost_mdoc::ProbeError;
use thiserror::Error;

/// Errors raised by project creation and data import.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project directory already exists: {path}")]
    Exists { path: String },

    #[error(
        "Duplicate import: '{name}' was previously imported from {existing_root}, \
         refusing to overwrite with {new_root}"
    )]
    DuplicateImport {
        name: String,
        existing_root: String,
        new_root: String,
    },

    #[error("Movie referenced by session metadata not found: {path}")]
    MovieMissing { path: String },

    #[error(transparent)]
    Glob(#[from] ProbeError),

    #[error("Qsub template unreadable at {path}: {reason}")]
    Template { path: String, reason: String },

    #[error("IO error at {path}: {reason}")]
    Io { path: String, reason: String },
}
