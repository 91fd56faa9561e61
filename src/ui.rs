//! On-page feedback owned by one page agent: the action control, transient notifications
//! and blocking alerts.

use std::cell::RefCell;
use std::time::Duration;

pub const VIP_BUTTON_LABEL: &str = "OCR & Copy Chapter (VIP)";
pub const TEXT_BUTTON_LABEL: &str = "Copy Chapter (Text)";
pub const VIP_BUSY_LABEL: &str = "Fetching Images...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: NoticeKind,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub enabled: bool,
}

#[derive(Debug, Default)]
pub struct PageUi {
    button: RefCell<Option<ActionButton>>,
    notifications: RefCell<Vec<Notification>>,
    alerts: RefCell<Vec<String>>,
}

impl PageUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the action control, replacing any previous one.
    pub fn install_button(&self, label: &str) {
        tracing::info!(label, "action control installed");
        self.button.replace(Some(ActionButton {
            label: label.to_owned(),
            enabled: true,
        }));
    }

    pub fn button(&self) -> Option<ActionButton> {
        self.button.borrow().clone()
    }

    /// Updates the control if one is installed.
    pub fn set_button(&self, label: &str, enabled: bool) {
        if let Some(button) = self.button.borrow_mut().as_mut() {
            button.label = label.to_owned();
            button.enabled = enabled;
        }
    }

    /// Shows a notification, replacing the current one.
    pub fn notify(&self, message: impl Into<String>, kind: NoticeKind, duration: Duration) {
        let message = message.into();
        match kind {
            NoticeKind::Error => tracing::error!(message = %message, "notification"),
            NoticeKind::Info | NoticeKind::Success => {
                tracing::info!(message = %message, ?kind, "notification")
            }
        }
        self.notifications.borrow_mut().push(Notification {
            message,
            kind,
            duration,
        });
    }

    /// The notification currently shown.
    pub fn notification(&self) -> Option<Notification> {
        self.notifications.borrow().last().cloned()
    }

    /// Every notification shown so far, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.borrow().clone()
    }

    /// Blocking alert for failures that must not go unnoticed.
    pub fn alert(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(message = %message, "alert");
        self.alerts.borrow_mut().push(message);
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.borrow().clone()
    }
}

pub const SHORT: Duration = Duration::from_millis(1500);
pub const NORMAL: Duration = Duration::from_secs(3);
pub const LONG: Duration = Duration::from_secs(5);
pub const ERROR: Duration = Duration::from_secs(7);
pub const PREFETCH: Duration = Duration::from_secs(20);
pub const PROGRESS: Duration = Duration::from_secs(2);
