use crate::error::ProcessError;
use crate::models::{ProcessInfo, RunId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// 一次受监管运行在注册表中的条目。
///
/// 原生进程句柄由监管任务独占持有，这里只保留发往该任务的终止信号。
#[derive(Debug)]
pub struct ProcessHandle {
    pub key: String,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub start_instant: Instant,
    pub pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            key: self.key.clone(),
            run_id: self.run_id.clone(),
            pid: self.pid,
            started_at: self.started_at,
        }
    }
}

/// `try_register` 成功后交给监管任务的凭据
#[derive(Debug)]
pub struct Registration {
    pub key: String,
    pub run_id: RunId,
    pub start_instant: Instant,
    pub stop_rx: oneshot::Receiver<()>,
}

/// key → 运行中进程，每个 key 最多一个
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    handles: HashMap<String, ProcessHandle>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_register(&mut self, key: &str) -> Result<Registration, ProcessError> {
        if self.handles.contains_key(key) {
            return Err(ProcessError::AlreadyRunning {
                key: key.to_string(),
            });
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let run_id = uuid::Uuid::new_v4().to_string();
        let start_instant = Instant::now();

        self.handles.insert(
            key.to_string(),
            ProcessHandle {
                key: key.to_string(),
                run_id: run_id.clone(),
                started_at: Utc::now(),
                start_instant,
                pid: None,
                stop_tx: Some(stop_tx),
            },
        );

        Ok(Registration {
            key: key.to_string(),
            run_id,
            start_instant,
            stop_rx,
        })
    }

    /// 进程启动后补记 pid；运行已被移除时忽略
    pub fn attach_pid(&mut self, key: &str, run_id: &str, pid: Option<u32>) {
        if let Some(handle) = self.handles.get_mut(key) {
            if handle.run_id == run_id {
                handle.pid = pid;
            }
        }
    }

    /// 幂等移除
    pub fn unregister(&mut self, key: &str) -> Option<ProcessHandle> {
        self.handles.remove(key)
    }

    /// 仅当 key 仍属于 `run_id` 这次运行时才移除，手动停止后同 key 的新运行不受影响
    pub fn unregister_run(&mut self, key: &str, run_id: &str) -> bool {
        match self.handles.get(key) {
            Some(handle) if handle.run_id == run_id => {
                self.handles.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ProcessHandle> {
        self.handles.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handles.contains_key(key)
    }

    /// 移除条目并通知监管任务终止进程。
    ///
    /// 不等待进程真正退出；退出后终止事件仍由监管任务照常发出。
    pub fn stop(&mut self, key: &str) -> Result<ProcessHandle, ProcessError> {
        let mut handle = self.handles.remove(key).ok_or_else(|| ProcessError::NotFound {
            key: key.to_string(),
        })?;

        if let Some(stop_tx) = handle.stop_tx.take() {
            // 监管任务已结束时接收端不存在，忽略即可
            let _ = stop_tx.send(());
        }

        Ok(handle)
    }

    pub fn keys(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self.handles.values().map(ProcessHandle::info).collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.key.cmp(&b.key)));
        infos
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_for_same_key_is_rejected() {
        let mut registry = ProcessRegistry::new();
        let first = registry.try_register("proj1").unwrap();

        let err = registry.try_register("proj1").unwrap_err();
        assert_eq!(
            err,
            ProcessError::AlreadyRunning {
                key: "proj1".to_string()
            }
        );
        assert_eq!(registry.get("proj1").unwrap().run_id, first.run_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_keys_coexist() {
        let mut registry = ProcessRegistry::new();
        let a = registry.try_register("a").unwrap();
        let b = registry.try_register("b").unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ProcessRegistry::new();
        registry.try_register("proj1").unwrap();

        assert!(registry.unregister("proj1").is_some());
        assert!(registry.unregister("proj1").is_none());
        assert!(registry.is_empty());
        assert!(registry.try_register("proj1").is_ok());
    }

    #[test]
    fn unregister_run_ignores_stale_run_id() {
        let mut registry = ProcessRegistry::new();
        let old = registry.try_register("proj1").unwrap();
        registry.stop("proj1").unwrap();
        let new = registry.try_register("proj1").unwrap();

        assert!(!registry.unregister_run("proj1", &old.run_id));
        assert!(registry.contains("proj1"));
        assert!(registry.unregister_run("proj1", &new.run_id));
        assert!(!registry.contains("proj1"));
    }

    #[tokio::test]
    async fn stop_signals_the_owner_and_removes_entry() {
        let mut registry = ProcessRegistry::new();
        let registration = registry.try_register("proj1").unwrap();

        let handle = registry.stop("proj1").unwrap();
        assert_eq!(handle.run_id, registration.run_id);
        assert!(registry.get("proj1").is_none());
        assert!(registration.stop_rx.await.is_ok());
    }

    #[test]
    fn stop_unknown_key_is_not_found() {
        let mut registry = ProcessRegistry::new();
        assert_eq!(
            registry.stop("ghost").unwrap_err(),
            ProcessError::NotFound {
                key: "ghost".to_string()
            }
        );
    }

    #[test]
    fn attach_pid_only_touches_matching_run() {
        let mut registry = ProcessRegistry::new();
        let registration = registry.try_register("proj1").unwrap();

        registry.attach_pid("proj1", "other-run", Some(1));
        assert_eq!(registry.get("proj1").unwrap().pid, None);

        registry.attach_pid("proj1", &registration.run_id, Some(4242));
        let info = &registry.snapshot()[0];
        assert_eq!(info.pid, Some(4242));
        assert_eq!(info.key, "proj1");
    }
}
