use thiserror::Error;

/// Errors raised during command assembly. A build error always means no
/// command was produced; placeholder invocations are never emitted.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Required parameter '{field}' is unset for job '{kind}'")]
    MissingParameter { kind: String, field: String },

    #[error("Tool '{tool}' is not present in the configuration")]
    UnknownTool { tool: String },
}
