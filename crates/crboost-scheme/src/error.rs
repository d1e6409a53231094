use crboost_command::CommandError;
use crboost_star::StarError;
use thiserror::Error;

/// Errors raised while materializing a scheme directory.
#[derive(Debug, Error)]
pub enum SchemeError {
    #[error("No job template for '{kind}' at {path}")]
    MissingTemplate { kind: String, path: String },

    #[error(transparent)]
    Star(#[from] StarError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error at {path}: {reason}")]
    Io { path: String, reason: String },
}
