//! Upload pipeline.
//!
//! One attempt per fired path:
//! `Start → StabilityCheck → RemoteExistenceCheck → Transfer → Verify →
//! LocalDelete → Done`, with `Aborted` reachable from every state before
//! `LocalDelete`. The local file is removed only after the remote copy is
//! durable or was already there.

mod error;
mod pipeline;
mod types;

pub use error::PipelineError;
pub use pipeline::{READ_CHUNK_SIZE, UploadPipeline};
pub use types::{AttemptState, Outcome};
