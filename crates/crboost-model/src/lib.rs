//! In-memory project state for the CryoBoost server.
//!
//! The types here are the single source of truth for everything the UI can
//! edit: grouped global parameters (microscope, acquisition, computing) and
//! one parameter record per selected job kind. Job records never copy global
//! fields; command assembly reads them from [`GlobalParams`] at build time.

mod atomic;
mod error;
mod job;
mod params;
mod project;

pub use atomic::write_file_atomic;
pub use error::ModelError;
pub use job::{JobKind, JobRecord, JobStatus, ParamValue, ToolTag};
pub use params::{Acquisition, Computing, GlobalParams, Microscope, format_float};
pub use project::{Project, SNAPSHOT_FILE};
