//! Project workspace creation: directory layout, the templated qsub script,
//! and raw data import by symlink.

mod error;
mod import;
mod layout;
mod qsub;

pub use error::ProjectError;
pub use import::{ImportReport, import_data, import_source_dirs};
pub use layout::{LAYOUT_DIRS, create_layout};
pub use qsub::{QSUB_FILE, write_qsub};
