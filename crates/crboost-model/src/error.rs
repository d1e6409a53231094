use thiserror::Error;

/// Errors raised by state model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A value failed its per-field range check. State is unchanged.
    #[error("Validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// The addressed job record is frozen because its execution has started.
    #[error("Job '{kind}' is frozen while its execution is live")]
    FrozenJob { kind: String },

    /// The on-disk snapshot could not be read back into a valid project.
    #[error("Snapshot invalid at {path}: {reason}")]
    SnapshotInvalid { path: String, reason: String },

    #[error("Snapshot write failed at {path}: {reason}")]
    SnapshotWriteFailed { path: String, reason: String },
}
