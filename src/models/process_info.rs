use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 区分同一个 key 下先后两次运行的标识
pub type RunId = String;

/// 注册表中正在运行的进程快照，供界面展示
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub key: String,
    pub run_id: RunId,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Completed,
    Failed,
    SpawnError,
}

/// 一次运行的终止结果，每次运行恰好产生一次
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub key: String,
    pub run_id: RunId,
    pub status: RunStatus,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_output: Option<String>,
}

impl RunOutcome {
    pub fn duration_label(&self) -> String {
        format!("{:.1}s", self.duration_ms as f64 / 1000.0)
    }
}
