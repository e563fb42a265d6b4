//! Attempt states and outcomes.

use std::fmt;

use bucketdrop_store::ObjectRef;

/// Where an upload attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptState {
    Start,
    StabilityCheck,
    RemoteExistenceCheck,
    Transfer,
    Verify,
    LocalDelete,
    Done,
}

impl AttemptState {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::Start => "start",
            AttemptState::StabilityCheck => "stability-check",
            AttemptState::RemoteExistenceCheck => "remote-existence-check",
            AttemptState::Transfer => "transfer",
            AttemptState::Verify => "verify",
            AttemptState::LocalDelete => "local-delete",
            AttemptState::Done => "done",
        }
    }

    /// States whose failure the user is always told about.
    ///
    /// Earlier aborts are mostly noise the next event retries (file gone,
    /// still being written); see `PipelineError::needs_attention` for the
    /// exceptions.
    pub fn reports_failure(self) -> bool {
        matches!(
            self,
            AttemptState::RemoteExistenceCheck | AttemptState::Transfer | AttemptState::Verify
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fresh transfer closed successfully.
    Uploaded {
        object: ObjectRef,
        bytes: u64,
        local_deleted: bool,
    },
    /// Remote object was already present; no transfer happened.
    SkippedExisting {
        object: ObjectRef,
        local_deleted: bool,
    },
    /// Attempt stopped in `state`. The local file is left in place.
    Aborted { state: AttemptState, reason: String },
}

impl Outcome {
    /// Outcome name logged when an attempt finishes.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Uploaded { .. } => "uploaded",
            Outcome::SkippedExisting { .. } => "skipped-existing",
            Outcome::Aborted { .. } => "failed",
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(self, Outcome::Aborted { .. })
    }
}
