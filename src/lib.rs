//! CryoBoost server: headnode orchestrator for cryo-ET processing.
//!
//! The library wires the focused crates together: the single-writer state
//! store owns the current project, the HTTP/WebSocket surface exposes it to
//! the browser UI, and the CLI boots the whole thing.

pub mod cli;
pub mod error;
pub mod server;
pub mod store;

pub use error::ServerError;
pub use store::{CreateProjectRequest, ProjectStore, ServerContext, StateView};
