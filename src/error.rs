use serde::Serialize;
use thiserror::Error;

/// 进程相关的同步失败，直接返回给调用方
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProcessError {
    #[error("a run is already active for {key}")]
    AlreadyRunning { key: String },

    #[error("{message}")]
    SpawnConfig { message: String },

    #[error("no running process for {key}")]
    NotFound { key: String },
}

impl ProcessError {
    pub fn spawn_config(message: impl Into<String>) -> Self {
        Self::SpawnConfig {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("account locked, try again in {remaining_seconds}s")]
    #[serde(rename_all = "camelCase")]
    AccountLocked { remaining_seconds: u64 },

    #[error("admin login required")]
    AdminRequired,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings are not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unable to resolve the user home directory")]
    HomeDirUnavailable,
}

impl Serialize for SettingsError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
