use thiserror::Error;

/// Errors raised while reading or editing STAR documents.
#[derive(Debug, Error)]
pub enum StarError {
    #[error("Malformed STAR document: {reason} (line {line})")]
    Malformed { line: usize, reason: String },

    #[error("Missing data block '{name}'")]
    MissingBlock { name: String },

    #[error("Block '{block}' has no column '{column}'")]
    MissingColumn { block: String, column: String },

    #[error("Block '{block}' has no entry '{key}'")]
    MissingKey { block: String, key: String },

    #[error("Unknown process status label '{label}'")]
    UnknownStatusLabel { label: String },
}
