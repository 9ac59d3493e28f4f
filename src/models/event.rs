use serde::{Deserialize, Serialize};

use super::{AuthChangeReason, LogLevel, LogRecord, Role, RunId, RunOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub level: LogLevel,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, level: LogLevel) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            level,
        }
    }
}

/// 推送给界面的全部事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiEvent {
    #[serde(rename_all = "camelCase")]
    Log {
        key: String,
        run_id: RunId,
        record: LogRecord,
    },
    Terminal {
        key: String,
        outcome: RunOutcome,
    },
    Notification {
        payload: Notification,
    },
    AuthChanged {
        role: Option<Role>,
        reason: AuthChangeReason,
    },
    #[serde(rename_all = "camelCase")]
    SessionWarning {
        remaining_seconds: u64,
    },
}

impl UiEvent {
    /// 窗口事件名
    pub fn channel(&self) -> &'static str {
        match self {
            UiEvent::Log { .. } => "process_log",
            UiEvent::Terminal { .. } => "process_terminal",
            UiEvent::Notification { .. } => "notification",
            UiEvent::AuthChanged { .. } => "auth_changed",
            UiEvent::SessionWarning { .. } => "session_warning",
        }
    }

    pub fn notification(title: impl Into<String>, body: impl Into<String>, level: LogLevel) -> Self {
        UiEvent::Notification {
            payload: Notification::new(title, body, level),
        }
    }
}
