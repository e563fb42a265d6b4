//! File stability detection.
//!
//! A writer is presumed finished once the file's size has held constant for
//! a minimum window. The detector polls the size at a fixed interval and
//! restarts the window every time the size changes between polls.
//!
//! Only the calling task waits; other paths keep going. Without a timeout an
//! endlessly growing file stalls its own attempt forever.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

/// Errors produced while waiting for a file to settle.
#[derive(Debug, thiserror::Error)]
pub enum StabilityError {
    #[error("could not stat {path} during stability check: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} kept changing for {waited:?}")]
    TimedOut { path: PathBuf, waited: Duration },
}

/// Polls file sizes until they stop changing.
#[derive(Debug, Clone, Copy)]
pub struct StabilityDetector {
    window: Duration,
    poll: Duration,
    timeout: Option<Duration>,
}

impl StabilityDetector {
    /// Creates a detector requiring `window` of unchanged size, sampled every `poll`.
    pub fn new(window: Duration, poll: Duration) -> Self {
        Self {
            window,
            poll,
            timeout: None,
        }
    }

    /// Gives up after `timeout` of total waiting. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Waits until `path` has kept the same size for the whole window.
    ///
    /// Returns the settled size. Fails if the file disappears or cannot be
    /// stat'ed at any poll.
    pub async fn wait_stable(&self, path: &Path) -> Result<u64, StabilityError> {
        self.wait_with(path, || std::fs::metadata(path).map(|m| m.len()))
            .await
    }

    async fn wait_with<F>(&self, path: &Path, mut probe: F) -> Result<u64, StabilityError>
    where
        F: FnMut() -> io::Result<u64>,
    {
        let started = Instant::now();
        let mut stable_since = started;
        let mut last_size: Option<u64> = None;

        loop {
            let size = probe().map_err(|source| StabilityError::Stat {
                path: path.to_path_buf(),
                source,
            })?;

            match last_size {
                Some(prev) if prev != size => {
                    tracing::trace!(path = %path.display(), prev, size, "size changed, restarting window");
                    stable_since = Instant::now();
                }
                _ => {}
            }
            last_size = Some(size);

            if stable_since.elapsed() >= self.window {
                tracing::debug!(
                    path = %path.display(),
                    size,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "file is stable"
                );
                return Ok(size);
            }

            if let Some(timeout) = self.timeout
                && started.elapsed() >= timeout
            {
                return Err(StabilityError::TimedOut {
                    path: path.to_path_buf(),
                    waited: started.elapsed(),
                });
            }

            tokio::time::sleep(self.poll).await;
        }
    }
}

/// Convenience wrapper for a one-off unbounded wait.
pub async fn wait_stable(
    path: &Path,
    window: Duration,
    poll: Duration,
) -> Result<u64, StabilityError> {
    StabilityDetector::new(window, poll).wait_stable(path).await
}
