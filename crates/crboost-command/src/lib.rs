//! Translation of parameter records into shell invocations.
//!
//! Two stages: the builder turns `(globals, job record, resolved paths)`
//! into the raw scientific command for a job kind, and the container
//! wrapper rewrites that into a container-executor line when the tool runs
//! from an image. Driver kinds short-circuit the builder: their command is
//! a bootstrap that re-reads the project snapshot on the compute node.

mod builder;
mod error;
mod wrap;

pub use builder::{ResolvedPaths, build_command};
pub use error::CommandError;
pub use wrap::{BindMount, ContainerWrapper, shell_quote_single};

/// Environment variable the driver bootstraps read the snapshot path from.
pub const PROJECT_PARAMS_ENV: &str = "CRBOOST_PROJECT_PARAMS";
