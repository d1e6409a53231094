//! Scheme materialization: turning a project into the on-disk directory the
//! downstream pipeliner consumes.
//!
//! A scheme is created per run and never edited after materialization. Job
//! subdirectories are copied from the server-shipped templates, their
//! `job.star` rewritten with the fully wrapped command in `fn_exe`, and the
//! top-level `scheme.star` is synthesized from the selection. Identical
//! inputs produce byte-identical output.

mod error;
mod materialize;

pub use error::SchemeError;
pub use materialize::{MaterializeContext, TEMPLATE_SCHEME_NAME, materialize_scheme, movies_wildcard};
