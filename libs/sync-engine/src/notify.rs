//! User-visible notifications.
//!
//! Components report outcomes through [`Notifier::notify`]; the UI
//! subscribes via [`Notifier::subscribe`] and renders each one as an
//! inline alert or a transient toast.

use tokio::sync::broadcast;

use crate::error::{FailureKind, SyncError};

/// Where the UI should render a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Next to the control that caused it (connect screen, producer form).
    Inline,
    /// Transient, not tied to a form.
    Toast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub surface: Surface,
    /// `None` for successes.
    pub kind: Option<FailureKind>,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            surface: Surface::Toast,
            kind: None,
            message: message.into(),
        }
    }

    pub fn failure(err: &SyncError, surface: Surface) -> Self {
        Self {
            level: Level::Error,
            surface,
            kind: Some(err.kind()),
            message: err.to_string(),
        }
    }
}

/// Broadcast bus for notifications. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of receivers that will see it.
    pub fn notify(&self, notification: Notification) -> usize {
        self.tx.send(notification).unwrap_or(0)
    }

    /// Log and publish a failure.
    pub fn failure(&self, err: &SyncError, surface: Surface) {
        tracing::warn!(kind = %err.kind(), error = %err, "surfacing failure");
        self.notify(Notification::failure(err, surface));
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(Notification::success(message));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}
