//! User-facing notification port.

use serde::{Deserialize, Serialize};

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message meant for the person running the host, not for logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Sink for user-facing messages.
///
/// Implementations must not block; the hub calls this from async contexts.
pub trait UserNotifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Discards every notice.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl UserNotifier for NoopNotifier {
    fn notify(&self, _notice: Notice) {}
}
