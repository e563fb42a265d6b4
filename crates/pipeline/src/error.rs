//! Reasons an upload attempt is abandoned.

use bucketdrop_stability::StabilityError;
use bucketdrop_store::StoreError;

/// Why an attempt ended in `Aborted`.
///
/// Never escapes [`crate::UploadPipeline::run`]; it is logged and folded into
/// the attempt's [`crate::Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("file no longer exists")]
    Missing,

    #[error("path is a directory")]
    Directory,

    #[error("could not stat file: {0}")]
    Stat(#[source] std::io::Error),

    #[error("file name is not valid UTF-8")]
    ObjectName,

    #[error(transparent)]
    Unstable(#[from] StabilityError),

    #[error("could not read local file: {0}")]
    Read(#[source] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("upload slots closed")]
    Closed,
}

impl PipelineError {
    /// The path simply isn't an uploadable file (anymore). Not worth a warning.
    pub fn is_skip(&self) -> bool {
        matches!(self, PipelineError::Missing | PipelineError::Directory)
    }

    /// The file is there but can never be picked up as-is; later events
    /// won't fix it.
    pub fn needs_attention(&self) -> bool {
        matches!(self, PipelineError::Stat(_) | PipelineError::ObjectName)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_vanished_paths_and_directories_are_skips() {
        assert!(PipelineError::Missing.is_skip());
        assert!(PipelineError::Directory.is_skip());
        assert!(!PipelineError::ObjectName.is_skip());
        assert!(!PipelineError::Stat(std::io::ErrorKind::PermissionDenied.into()).is_skip());
    }

    #[test]
    fn unreadable_and_unnameable_files_need_attention() {
        assert!(PipelineError::ObjectName.needs_attention());
        assert!(PipelineError::Stat(std::io::ErrorKind::PermissionDenied.into()).needs_attention());
        assert!(!PipelineError::Missing.needs_attention());
        assert!(!PipelineError::Closed.needs_attention());
    }
}
