//! User-facing notifications.
//!
//! Display is the host's concern; this module only decides *whether* a
//! notification should be shown. Dedup state is per session and owned by the
//! caller, never global, so independent projects and tests cannot leak
//! notifications into each other.

use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub content: String,
}

/// Sink the host implements to actually display balloons.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl<T: Notifier + ?Sized> Notifier for std::sync::Arc<T> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}

/// Binding-problem notifications for one project session. At most one balloon
/// is shown until the binding changes and [`reset`](Self::reset) is called.
pub struct BindingNotifications<N: Notifier> {
    notifier: N,
    shown: Mutex<bool>,
}

impl<N: Notifier> BindingNotifications<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier,
            shown: Mutex::new(false),
        }
    }

    pub fn notify_connection_invalid(&self) {
        self.notify_once(Notification {
            kind: NotificationKind::Error,
            title: "CodeScan - Project binding invalid".to_string(),
            content: "Project bound to an invalid connection. Please check the configuration."
                .to_string(),
        });
    }

    pub fn notify_project_key_invalid(&self) {
        self.notify_once(Notification {
            kind: NotificationKind::Error,
            title: "CodeScan - Project binding invalid".to_string(),
            content: "Project bound to an invalid remote project. Please check the configuration."
                .to_string(),
        });
    }

    /// Clear the shown flag after the binding configuration changed.
    pub fn reset(&self) {
        if let Ok(mut shown) = self.shown.lock() {
            *shown = false;
        }
    }

    fn notify_once(&self, notification: Notification) {
        let mut shown = match self.shown.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if *shown {
            debug!("Binding notification already shown this session, skipping");
            return;
        }
        *shown = true;
        drop(shown);
        self.notifier.notify(notification);
    }
}

/// Content-keyed dedup for notifications that may fire from many code paths
/// with the same message, e.g. analyzer requirement warnings.
pub struct OnceNotifications<N: Notifier> {
    notifier: N,
    already_notified: Mutex<HashSet<String>>,
}

impl<N: Notifier> OnceNotifications<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier,
            already_notified: Mutex::new(HashSet::new()),
        }
    }

    /// Show the notification unless one with identical content was already
    /// shown this session.
    pub fn notify_once(&self, notification: Notification) {
        let mut seen = match self.already_notified.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if !seen.insert(notification.content.clone()) {
            return;
        }
        drop(seen);
        self.notifier.notify(notification);
    }

    pub fn reset(&self) {
        if let Ok(mut seen) = self.already_notified.lock() {
            seen.clear();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CollectingNotifier;
    use super::*;

    fn warning(content: &str) -> Notification {
        Notification {
            kind: NotificationKind::Warning,
            title: "title".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_binding_notification_shown_once_per_session() {
        let notifier = CollectingNotifier::default();
        let notifications = BindingNotifications::new(notifier.clone());

        notifications.notify_connection_invalid();
        notifications.notify_project_key_invalid();
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_reset_allows_new_binding_notification() {
        let notifier = CollectingNotifier::default();
        let notifications = BindingNotifications::new(notifier.clone());

        notifications.notify_connection_invalid();
        notifications.reset();
        notifications.notify_connection_invalid();
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn test_once_notifications_dedup_by_content() {
        let notifier = CollectingNotifier::default();
        let once = OnceNotifications::new(notifier.clone());

        once.notify_once(warning("node too old"));
        once.notify_once(warning("node too old"));
        once.notify_once(warning("jre too old"));
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn test_sessions_do_not_share_dedup_state() {
        let notifier = CollectingNotifier::default();
        let first = OnceNotifications::new(notifier.clone());
        let second = OnceNotifications::new(notifier.clone());

        first.notify_once(warning("same content"));
        second.notify_once(warning("same content"));
        assert_eq!(notifier.count(), 2);
    }
}
