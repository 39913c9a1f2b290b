//! User-facing notification bus.
//!
//! A thin publish/subscribe hub for toast-style notifications, backed
//! by a `tokio::sync::broadcast` channel.  Publishing with zero
//! subscribers is a silent no-op.

use serde::Serialize;
use tokio::sync::broadcast;
use ts_rs::TS;

/// Default buffer capacity for the notification channel.
const DEFAULT_CAPACITY: usize = 256;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum NotificationLevel {
    Success,
    Error,
    Warning,
}

/// A human-readable message for the user.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

/// In-process fan-out bus for [`Notification`]s.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all notifications published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn success(&self, message: impl Into<String>) {
        self.publish(NotificationLevel::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(NotificationLevel::Error, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.publish(NotificationLevel::Warning, message);
    }

    fn publish(&self, level: NotificationLevel, message: impl Into<String>) {
        let notification = Notification {
            level,
            message: message.into(),
        };
        tracing::debug!(?notification.level, message = %notification.message, "Notification");
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.sender.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
