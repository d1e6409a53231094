//! Progress watching: the pipeliner exposes live job status only through
//! its processes file, so a per-project task polls that file, derives
//! per-kind status, and broadcasts deltas to UI subscribers.
//!
//! The pipeliner owns the file and may rename or truncate it at any moment;
//! reads that fail are simply retried on the next tick. Only a sustained
//! run of failures surfaces as a warning event.

mod derive;
mod watcher;

pub use derive::{PROCESSES_FILE, StatusCounters, derive_statuses, read_statuses};
pub use watcher::{ProgressEvent, Watcher, WatcherHandle};
