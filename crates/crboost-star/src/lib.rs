//! STAR tabular documents as the downstream pipeliner reads and writes them.
//!
//! Three consumers sit on one generic document model:
//! scheme descriptions (written by us, read by the pipeliner), per-job
//! option tables (template in, rewritten out), and the pipeliner's own
//! process table (read by us, rewritten only on abort).
//!
//! The writer is deterministic: emitting the same document twice yields
//! byte-identical output. The parser is whitespace-tolerant and preserves
//! row order, but makes no attempt to preserve incidental column widths.

mod document;
mod error;
mod jobstar;
mod processes;
mod scheme;

pub use document::{BlockContent, StarBlock, StarDocument, StarTable};
pub use error::StarError;
pub use jobstar::JobStar;
pub use processes::{ProcessEntry, ProcessStatus, ProcessTable};
pub use scheme::{SchemeFloats, synthesize_scheme};
