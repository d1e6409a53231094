use crboost_mdoc::ProbeError;
use crboost_model::ModelError;
use crboost_project::ProjectError;
use crboost_runner::RunnerError;
use crboost_scheme::SchemeError;
use thiserror::Error;

/// Service-level error type.
///
/// Every failure the UI can see has a stable machine-readable kind (see
/// [`ServerError::kind`]) plus a human message; the UI maps kinds to
/// notifications. State is never mutated on an error path.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Job '{kind}' is frozen while its execution is live")]
    FrozenJob { kind: String },

    #[error("A pipeline is currently active")]
    PipelineActive,

    #[error("No project is open")]
    NoProject,

    #[error("No pipeline is running")]
    NotRunning,

    #[error("Duplicate import of '{name}': recorded source {existing_root}")]
    DuplicateImport { name: String, existing_root: String },

    #[error("Project already exists: {path}")]
    Exists { path: String },

    #[error("Bad glob '{pattern}': {reason}")]
    BadGlob { pattern: String, reason: String },

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Project snapshot is invalid: {reason}")]
    SnapshotInvalid { reason: String },

    #[error("Required parameter '{field}' is unset for job '{kind}'")]
    MissingParameter { kind: String, field: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl ServerError {
    /// Stable machine-readable error kind for the wire surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::FrozenJob { .. } => "frozen_job",
            Self::PipelineActive => "pipeline_active",
            Self::NoProject => "no_project",
            Self::NotRunning => "not_running",
            Self::DuplicateImport { .. } => "duplicate_import",
            Self::Exists { .. } => "exists",
            Self::BadGlob { .. } => "bad_glob",
            Self::NotFound { .. } => "not_found",
            Self::SnapshotInvalid { .. } => "snapshot_invalid",
            Self::MissingParameter { .. } => "missing_parameter",
            Self::Internal { .. } => "internal",
        }
    }

    fn internal(reason: impl std::fmt::Display) -> Self {
        Self::Internal {
            reason: reason.to_string(),
        }
    }
}

impl From<ModelError> for ServerError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Validation { field, reason } => Self::Validation { field, reason },
            ModelError::FrozenJob { kind } => Self::FrozenJob { kind },
            ModelError::SnapshotInvalid { reason, .. } => Self::SnapshotInvalid { reason },
            ModelError::SnapshotWriteFailed { .. } => Self::internal(err),
        }
    }
}

impl From<ProbeError> for ServerError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::NoMatch { pattern } => Self::BadGlob {
                pattern,
                reason: "no files match".to_string(),
            },
            ProbeError::BadPattern { pattern, reason } => Self::BadGlob { pattern, reason },
            ProbeError::Io { path, reason } => Self::BadGlob {
                pattern: path,
                reason,
            },
        }
    }
}

impl From<ProjectError> for ServerError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::Exists { path } => Self::Exists { path },
            ProjectError::DuplicateImport {
                name,
                existing_root,
                ..
            } => Self::DuplicateImport {
                name,
                existing_root,
            },
            ProjectError::MovieMissing { path } => Self::BadGlob {
                pattern: path,
                reason: "referenced movie not found".to_string(),
            },
            ProjectError::Glob(e) => e.into(),
            ProjectError::Template { .. } | ProjectError::Io { .. } => Self::internal(err),
        }
    }
}

impl From<SchemeError> for ServerError {
    fn from(err: SchemeError) -> Self {
        match err {
            SchemeError::Command(crboost_command::CommandError::MissingParameter {
                kind,
                field,
            }) => Self::MissingParameter { kind, field },
            other => Self::internal(other),
        }
    }
}

impl From<RunnerError> for ServerError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::NotRunning => Self::NotRunning,
            RunnerError::PipelineActive { .. } => Self::PipelineActive,
            other => Self::internal(other),
        }
    }
}
