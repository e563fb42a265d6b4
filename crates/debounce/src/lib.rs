//! Debounce coalescer for filesystem events.
//!
//! Bursts of notifications for the same path collapse into one callback,
//! fired once the path has been quiet for the debounce window. Every timer
//! and every callback runs inside one [`TaskTracker`], so shutdown can cancel
//! pending timers and then wait for callbacks already running.
//!
//! The path → pending-timer map is the only shared state. Its lock is held
//! for single map operations only, never across a wait or a callback.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Future returned by the fire callback.
pub type FireFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback invoked with the path once its debounce window elapses.
pub type OnFireFn = Arc<dyn Fn(PathBuf) -> FireFuture + Send + Sync + 'static>;

/// Collapses repeated notifications per path into a single callback.
pub struct Debouncer {
    inner: Arc<Inner>,
}

struct Inner {
    window: Duration,
    /// Pending timers: path → timer context.
    pending: Mutex<HashMap<PathBuf, PendingTransfer>>,
    on_fire: OnFireFn,
    tasks: TaskTracker,
    /// Cancelled at shutdown; stops all pending timers.
    shutdown: CancellationToken,
    next_generation: AtomicU64,
}

/// A scheduled, not-yet-completed callback for one path.
struct PendingTransfer {
    cancel: CancellationToken,
    /// Distinguishes this timer from a later replacement for the same path.
    generation: u64,
    created_at: Instant,
}

impl Debouncer {
    /// Creates a debouncer that calls `on_fire` after `window` of quiet.
    pub fn new(window: Duration, on_fire: OnFireFn) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                pending: Mutex::new(HashMap::new()),
                on_fire,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Records an event for `path`, restarting its debounce window.
    ///
    /// A timer that has not fired yet is cancelled and replaced. A callback
    /// that is already running is left alone; the new timer is independent.
    /// Ignored after [`Debouncer::shutdown`].
    pub fn notify(&self, path: PathBuf) {
        if self.inner.shutdown.is_cancelled() {
            tracing::debug!(path = %path.display(), "debouncer stopped, ignoring event");
            return;
        }

        let cancel = CancellationToken::new();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.inner.lock_pending();
            if let Some(prev) = pending.insert(
                path.clone(),
                PendingTransfer {
                    cancel: cancel.clone(),
                    generation,
                    created_at: Instant::now(),
                },
            ) {
                prev.cancel.cancel();
                tracing::trace!(
                    path = %path.display(),
                    age_ms = prev.created_at.elapsed().as_millis() as u64,
                    "debounce window restarted"
                );
            }
        }

        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(inner.window) => {}
            }

            tracing::debug!(path = %path.display(), "processing debounced file");
            (inner.on_fire)(path.clone()).await;

            let mut pending = inner.lock_pending();
            if pending.get(&path).is_some_and(|p| p.generation == generation) {
                pending.remove(&path);
            }
        });
    }

    /// Runs the callback for `path` immediately, inside the task group.
    ///
    /// Any pending timer for the path is cancelled first. Used for files
    /// found by the startup scan, which are expected to be at rest already.
    pub fn fire_now(&self, path: PathBuf) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        if let Some(prev) = self.inner.lock_pending().remove(&path) {
            prev.cancel.cancel();
        }
        let on_fire = Arc::clone(&self.inner.on_fire);
        self.inner.tasks.spawn(async move {
            on_fire(path).await;
        });
    }

    /// Number of paths with a timer scheduled or a callback still running.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Returns whether `path` has a timer scheduled or a callback running.
    pub fn is_pending(&self, path: &Path) -> bool {
        self.inner.lock_pending().contains_key(path)
    }

    /// Stops accepting events and cancels every timer that has not fired.
    ///
    /// Callbacks already running continue; use [`Debouncer::drain`] to wait
    /// for them.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        let mut pending = self.inner.lock_pending();
        for (path, ctx) in pending.drain() {
            ctx.cancel.cancel();
            tracing::trace!(path = %path.display(), "pending timer cancelled");
        }
    }

    /// Shuts down, then waits up to `grace` for running callbacks.
    ///
    /// Returns `true` if everything finished within the grace period.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.shutdown();
        let in_flight = self.inner.tasks.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "waiting for in-flight uploads");
        }
        tokio::time::timeout(grace, self.inner.tasks.wait())
            .await
            .is_ok()
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<PathBuf, PendingTransfer>> {
        // Map operations are single calls; a poisoned map is still consistent.
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
