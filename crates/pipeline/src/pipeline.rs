//! The per-attempt state machine.

use std::path::Path;
use std::sync::Arc;

use bucketdrop_auth::AuthSelector;
use bucketdrop_config::Config;
use bucketdrop_notifier::{Notification, Notifier};
use bucketdrop_stability::StabilityDetector;
use bucketdrop_store::{ObjectRef, ObjectWriter, StoreConnector};
use tokio::io::AsyncReadExt;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{Instrument, debug, info, warn};

use crate::error::PipelineError;
use crate::types::{AttemptState, Outcome};

/// Bytes read from the local file per write call.
pub const READ_CHUNK_SIZE: usize = 256 * 1024;

/// Runs upload attempts for files in the watched directory.
///
/// Holds no per-file state; concurrent `run` calls for different paths are
/// independent apart from the optional upload-slot limit.
pub struct UploadPipeline {
    config: Arc<Config>,
    stability: StabilityDetector,
    auth: AuthSelector,
    connector: Arc<dyn StoreConnector>,
    notifier: Arc<dyn Notifier>,
    /// Bounds attempts between the existence check and the local delete.
    slots: Option<Semaphore>,
}

impl UploadPipeline {
    pub fn new(
        config: Arc<Config>,
        auth: AuthSelector,
        connector: Arc<dyn StoreConnector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let stability = StabilityDetector::new(config.stability_window, config.stability_poll)
            .with_timeout(config.stability_timeout);
        let slots = match config.max_concurrent_uploads {
            0 => None,
            n => Some(Semaphore::new(n)),
        };
        Self {
            config,
            stability,
            auth,
            connector,
            notifier,
            slots,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one attempt for `path` to a terminal state.
    ///
    /// Never fails: per-file faults end the attempt as [`Outcome::Aborted`].
    pub async fn run(&self, path: &Path) -> Outcome {
        let attempt = uuid::Uuid::new_v4();
        let span = tracing::info_span!("upload", attempt = %attempt, path = %path.display());
        self.attempt(path).instrument(span).await
    }

    async fn attempt(&self, path: &Path) -> Outcome {
        let mut state = AttemptState::Start;
        match self.drive(path, &mut state).await {
            Ok(outcome) => outcome,
            Err(error) => self.aborted(path, state, error),
        }
    }

    async fn drive(&self, path: &Path, state: &mut AttemptState) -> Result<Outcome, PipelineError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(PipelineError::Missing),
            Err(e) => return Err(PipelineError::Stat(e)),
        };
        if meta.is_dir() {
            return Err(PipelineError::Directory);
        }
        let object =
            ObjectRef::for_file(&self.config.bucket, path).ok_or(PipelineError::ObjectName)?;

        enter(state, AttemptState::StabilityCheck);
        let size = self.stability.wait_stable(path).await?;

        let _slot = self.acquire_slot().await?;

        enter(state, AttemptState::RemoteExistenceCheck);
        let auth = self.auth.resolve().await;
        debug!(strategy = auth.strategy(), "credentials resolved");
        let store = self.connector.connect(&auth).await?;

        if store.exists(&object).await? {
            debug!(object = %object, "remote object already present, skipping transfer");
            enter(state, AttemptState::LocalDelete);
            let local_deleted = delete_local(path).await;
            enter(state, AttemptState::Done);
            self.notify(&Notification::existed(&object.name, &object.bucket));
            let outcome = Outcome::SkippedExisting {
                object,
                local_deleted,
            };
            info!(outcome = outcome.label(), "attempt finished");
            return Ok(outcome);
        }

        enter(state, AttemptState::Transfer);
        let mut writer = store.open_writer(&object).await?;
        let bytes = match copy_file(path, writer.as_mut()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    debug!(error = %abort_err, "releasing writer failed");
                }
                return Err(e);
            }
        };
        if bytes != size {
            debug!(expected = size, sent = bytes, "file size changed after stability check");
        }

        enter(state, AttemptState::Verify);
        writer.close().await?;

        enter(state, AttemptState::LocalDelete);
        let local_deleted = delete_local(path).await;
        enter(state, AttemptState::Done);
        self.notify(&Notification::uploaded(&object.name, &object.bucket));
        let outcome = Outcome::Uploaded {
            object,
            bytes,
            local_deleted,
        };
        info!(outcome = outcome.label(), bytes, "attempt finished");
        Ok(outcome)
    }

    async fn acquire_slot(&self) -> Result<Option<SemaphorePermit<'_>>, PipelineError> {
        match &self.slots {
            Some(slots) => {
                let permit = slots.acquire().await.map_err(|_| PipelineError::Closed)?;
                Ok(Some(permit))
            }
            None => Ok(None),
        }
    }

    fn aborted(&self, path: &Path, state: AttemptState, error: PipelineError) -> Outcome {
        let outcome = Outcome::Aborted {
            state,
            reason: error.to_string(),
        };
        if error.is_skip() {
            debug!(reason = %error, "skipping");
        } else {
            warn!(outcome = outcome.label(), state = %state, error = %error, "attempt finished");
        }

        if state.reports_failure() || error.needs_attention() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.notify(&Notification::failed(&name, &self.config.bucket, &error.to_string()));
        }
        outcome
    }

    fn notify(&self, notification: &Notification) {
        if self.config.notifications {
            self.notifier.notify(notification);
        }
    }
}

fn enter(state: &mut AttemptState, next: AttemptState) {
    debug!(from = %state, to = %next, "state transition");
    *state = next;
}

/// Streams the file into `writer`, returning the byte count.
async fn copy_file(path: &Path, writer: &mut dyn ObjectWriter) -> Result<u64, PipelineError> {
    let mut file = tokio::fs::File::open(path).await.map_err(PipelineError::Read)?;
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).await.map_err(PipelineError::Read)?;
        if n == 0 {
            return Ok(total);
        }
        writer.write(&buf[..n]).await?;
        total += n as u64;
    }
}

/// Removes the local copy. Failure is logged; the remote copy is already safe.
async fn delete_local(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("local file deleted");
            true
        }
        Err(e) => {
            warn!(error = %e, "could not delete local file after upload");
            false
        }
    }
}
