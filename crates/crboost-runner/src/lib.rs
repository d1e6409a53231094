//! Supervision of the downstream pipeliner process and the multi-step abort
//! path that cleans up after it.

mod error;
mod probe;
mod runner;

pub use error::RunnerError;
pub use probe::{ProbeOutput, run_probe};
pub use runner::{PIPELINER_BIN, PipelineRunner, RunnerPhase, SLURM_ID_FILE, SUCCESS_MARKER};
