use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthChangeReason {
    Login,
    UserInitiated,
    Expired,
}

/// 界面上报的用户活动；只有按下、按键、滚动、触摸会延长会话
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    PointerDown,
    KeyDown,
    Scroll,
    Touch,
    PointerMove,
}

impl ActivityKind {
    pub fn is_qualifying(&self) -> bool {
        !matches!(self, ActivityKind::PointerMove)
    }
}

/// 单个用户名的连续失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttemptState {
    pub username: String,
    pub failure_count: u32,
    pub locked_until: Option<Instant>,
}

impl AuthAttemptState {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            failure_count: 0,
            locked_until: None,
        }
    }

    pub fn remaining_lock(&self, now: Instant) -> Option<std::time::Duration> {
        self.locked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub role: Role,
    pub login_time: DateTime<Utc>,
    pub remaining_seconds: u64,
}

/// 登录锁定与会话超时参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthPolicy {
    pub max_attempts: u32,
    pub lockout_secs: u64,
    pub session_timeout_secs: u64,
    pub session_warning_secs: u64,
    pub activity_throttle_secs: u64,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_secs: 5 * 60,
            session_timeout_secs: 30 * 60,
            session_warning_secs: 2 * 60,
            activity_throttle_secs: 30,
        }
    }
}
