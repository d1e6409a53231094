//! Acquisition session metadata (`.mdoc`) handling.
//!
//! Two concerns live here: the metadata probe that derives initial
//! microscope/acquisition parameters from the first matching session file,
//! and the line-level rewriting used when raw data is imported into a
//! project (frame paths get the project prefix; a root-path marker records
//! where the file came from).

mod glob;
mod probe;
mod rewrite;
mod session;

pub use glob::expand_glob;
pub use probe::{ProbeError, ProbeReport, probe_first};
pub use rewrite::{ROOT_MDOC_KEY, append_root_marker, root_marker, rewrite_subframe_paths};
pub use session::MdocSession;
