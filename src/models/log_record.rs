use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 界面使用的四级日志分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    /// 把外部进程的级别词汇映射到四级分类，大小写不敏感，未知值归为 info
    pub fn from_external(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "INFO" => LogLevel::Info,
            "WARNING" | "WARN" => LogLevel::Warning,
            "ERROR" | "CRITICAL" | "FATAL" => LogLevel::Error,
            "SUCCESS" => LogLevel::Success,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// 非结构化行的默认级别：stdout 为 info，stderr 为 error
    pub fn default_level(&self) -> LogLevel {
        match self {
            StreamKind::Stdout => LogLevel::Info,
            StreamKind::Stderr => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
    pub source: StreamKind,
    /// 结构化行里除 level/message/timestamp 之外的字段（job、stage、data ...）
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl LogRecord {
    pub fn plain(source: StreamKind, message: impl Into<String>) -> Self {
        Self {
            level: source.default_level(),
            message: message.into(),
            timestamp: now_timestamp(),
            source,
            extra: Map::new(),
        }
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
