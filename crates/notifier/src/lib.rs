//! User-facing notification sinks.
//!
//! Delivery is fire-and-forget: [`Notifier::notify`] returns immediately,
//! and a sink that cannot deliver only logs the failure.

use std::sync::Mutex;

/// Subtitle / application name shown by desktop notifications.
pub const APP_NAME: &str = "bucketdrop";

/// Which attempt outcome a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Uploaded,
    Existed,
    Failed,
}

/// A title / message pair for one attempt outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn uploaded(object: &str, bucket: &str) -> Self {
        Self {
            kind: NotificationKind::Uploaded,
            title: "File Uploaded".into(),
            message: format!("Successfully uploaded '{object}' to bucket '{bucket}'."),
        }
    }

    pub fn existed(object: &str, bucket: &str) -> Self {
        Self {
            kind: NotificationKind::Existed,
            title: "File Existed".into(),
            message: format!("File '{object}' already existed in bucket '{bucket}'. Local file deleted."),
        }
    }

    pub fn failed(object: &str, bucket: &str, reason: &str) -> Self {
        Self {
            kind: NotificationKind::Failed,
            title: "Upload Failed".into(),
            message: format!("Could not upload '{object}' to bucket '{bucket}': {reason}"),
        }
    }
}

/// A sink for user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &Notification) {}
}

/// Writes notifications to the log instead of the desktop.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        tracing::info!(title = %notification.title, "{}", notification.message);
    }
}

/// Keeps every notification in memory, oldest first.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of what has been sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.title).collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification.clone());
    }
}

/// Native desktop notifications by shelling out to the platform tool.
///
/// `osascript` on macOS, `notify-send` on Linux, nothing elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    pub fn new() -> Self {
        Self
    }

    /// Whether this platform has a delivery mechanism.
    pub fn is_supported() -> bool {
        cfg!(any(target_os = "macos", target_os = "linux"))
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, notification: &Notification) {
        let Some(mut command) = desktop_command(notification) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, dropping desktop notification");
            return;
        };

        let title = notification.title.clone();
        runtime.spawn(async move {
            match command.output().await {
                Ok(output) if output.status.success() => {}
                Ok(output) => tracing::warn!(
                    title = %title,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "desktop notification failed"
                ),
                Err(e) => tracing::warn!(title = %title, error = %e, "could not run notification tool"),
            }
        });
    }
}

#[cfg(target_os = "macos")]
fn desktop_command(notification: &Notification) -> Option<tokio::process::Command> {
    let script = format!(
        "display notification \"{}\" with title \"{}\" subtitle \"{}\"",
        applescript_escape(&notification.message),
        applescript_escape(&notification.title),
        APP_NAME,
    );
    let mut command = tokio::process::Command::new("osascript");
    command.args(["-e", &script]);
    Some(command)
}

#[cfg(target_os = "linux")]
fn desktop_command(notification: &Notification) -> Option<tokio::process::Command> {
    let mut command = tokio::process::Command::new("notify-send");
    command
        .arg(format!("--app-name={APP_NAME}"))
        .arg(&notification.title)
        .arg(&notification.message);
    Some(command)
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn desktop_command(_notification: &Notification) -> Option<tokio::process::Command> {
    None
}

/// Escapes a string for use inside an AppleScript string literal.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn applescript_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
