use thiserror::Error;

/// Startup configuration errors. All of these are fatal: the server exits
/// with a non-zero code instead of serving requests.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: String },

    #[error("Failed to read config file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid config value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Tool '{name}' must declare exactly one of binary/container as true")]
    AmbiguousToolMode { name: String },

    #[error("Container image for tool '{name}' does not exist: {path}")]
    ContainerImageMissing { name: String, path: String },
}
