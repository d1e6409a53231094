use thiserror::Error;

/// Errors raised by pipeline supervision.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Abort was requested but no supervised pipeliner is live.
    #[error("No pipeline is running")]
    NotRunning,

    /// Start or reset was requested while a run is live.
    #[error("A pipeline is already active (phase {phase})")]
    PipelineActive { phase: String },

    #[error("Failed to spawn pipeliner: {reason}")]
    SpawnFailed { reason: String },

    #[error("Shell call timed out after {timeout_secs}s: {command}")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("IO error at {path}: {reason}")]
    Io { path: String, reason: String },
}
