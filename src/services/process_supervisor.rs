use crate::error::ProcessError;
use crate::models::{
    LogLevel, LogRecord, ProcessInfo, RunId, RunOutcome, RunStatus, StreamKind, UiEvent,
};
use crate::services::{EventSink, LineDecoder, ProcessHandle, ProcessRegistry};
use crate::utils::terminate_process_tree;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const OUTPUT_TAIL_LINES: usize = 200;
const READ_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 一次运行所需的完整命令行
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    pub key: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl RunRequest {
    pub fn new(key: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

fn lock_registry(registry: &Mutex<ProcessRegistry>) -> MutexGuard<'_, ProcessRegistry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 管理外部进程的启动、日志转发和结束通知
#[derive(Clone)]
pub struct ProcessSupervisor {
    registry: Arc<Mutex<ProcessRegistry>>,
    sink: Arc<dyn EventSink>,
    drain_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(ProcessRegistry::new())),
            sink,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// 启动一次运行。
    ///
    /// 配置缺失和同 key 已在运行会直接返回错误；启动失败、崩溃、非零退出
    /// 都通过该运行唯一的终止事件异步报告。需要在 tokio 运行时内调用。
    pub fn run(&self, request: RunRequest) -> Result<RunId, ProcessError> {
        let working_dir = request
            .working_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| ProcessError::spawn_config("ETL project path not configured"))?;

        if request.program.trim().is_empty() {
            return Err(ProcessError::spawn_config("interpreter path not configured"));
        }

        let registration = lock_registry(&self.registry).try_register(&request.key)?;
        let run_id = registration.run_id.clone();

        let completion = RunCompletion {
            context: Arc::new(RunContext {
                key: registration.key.clone(),
                run_id: run_id.clone(),
                sink: self.sink.clone(),
                output: Mutex::new(OutputTail::default()),
            }),
            registry: self.registry.clone(),
            start_instant: registration.start_instant,
            finished: false,
        };

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        for (key, value) in &request.env {
            command.env(key, value);
        }

        match command.spawn() {
            Ok(child) => {
                log::info!(
                    "[ProcessSupervisor] started {} (run {}, pid {:?}) in {}",
                    request.key,
                    run_id,
                    child.id(),
                    working_dir.display()
                );
                lock_registry(&self.registry).attach_pid(&request.key, &run_id, child.id());
                tokio::spawn(supervise(
                    child,
                    registration.stop_rx,
                    completion,
                    self.drain_timeout,
                ));
            }
            Err(e) => {
                let message = format!("failed to start {}: {}", request.program, e);
                log::error!("[ProcessSupervisor] {} ({})", message, request.key);
                completion
                    .context
                    .emit_log(LogRecord::plain(StreamKind::Stderr, message.clone()));
                completion.finish(RunStatus::SpawnError, None, false, Some(message));
            }
        }

        Ok(run_id)
    }

    /// 发送终止信号并立即移除；进程真正退出后仍会收到正常的终止事件
    pub fn stop(&self, key: &str) -> Result<(), ProcessError> {
        let handle = lock_registry(&self.registry).stop(key)?;
        log::info!(
            "[ProcessSupervisor] stop requested for {} (run {})",
            key,
            handle.run_id
        );

        self.sink.emit(UiEvent::notification(
            "Pipeline stopped",
            format!("{} was stopped manually", key),
            LogLevel::Warning,
        ));
        Ok(())
    }

    /// 停止全部运行，返回被停止的 key
    pub fn stop_all(&self) -> Vec<String> {
        let keys = lock_registry(&self.registry).keys();
        keys.into_iter()
            .filter(|key| self.stop(key).is_ok())
            .collect()
    }

    /// 退出前调用：在当前线程里终止全部进程树后才返回，不依赖监管任务继续运行
    pub fn shutdown(&self) -> Vec<String> {
        let handles: Vec<ProcessHandle> = {
            let mut registry = lock_registry(&self.registry);
            registry
                .keys()
                .into_iter()
                .filter_map(|key| registry.stop(&key).ok())
                .collect()
        };

        handles
            .into_iter()
            .map(|handle| {
                if let Some(pid) = handle.pid {
                    log::info!(
                        "[ProcessSupervisor] shutting down {} (pid {})",
                        handle.key,
                        pid
                    );
                    if let Err(e) = terminate_process_tree(pid) {
                        log::warn!("[ProcessSupervisor] shutdown of {} failed: {}", handle.key, e);
                    }
                }
                handle.key
            })
            .collect()
    }

    pub fn running(&self) -> Vec<ProcessInfo> {
        lock_registry(&self.registry).snapshot()
    }

    pub fn get(&self, key: &str) -> Option<ProcessInfo> {
        lock_registry(&self.registry).get(key).map(|handle| handle.info())
    }

    pub fn is_running(&self, key: &str) -> bool {
        lock_registry(&self.registry).contains(key)
    }
}

/// 每次运行保留的输出尾部，失败时作为错误文本
#[derive(Debug, Default)]
struct OutputTail {
    stderr: VecDeque<String>,
    errors: VecDeque<String>,
}

impl OutputTail {
    fn push(&mut self, record: &LogRecord) {
        if record.source == StreamKind::Stderr {
            push_capped(&mut self.stderr, &record.message);
        }
        if record.level == LogLevel::Error {
            push_capped(&mut self.errors, &record.message);
        }
    }

    fn failure_text(&self) -> Option<String> {
        let lines = if self.errors.is_empty() {
            &self.stderr
        } else {
            &self.errors
        };
        if lines.is_empty() {
            None
        } else {
            Some(lines.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
    }
}

fn push_capped(lines: &mut VecDeque<String>, line: &str) {
    if lines.len() == OUTPUT_TAIL_LINES {
        lines.pop_front();
    }
    lines.push_back(line.to_string());
}

struct RunContext {
    key: String,
    run_id: RunId,
    sink: Arc<dyn EventSink>,
    output: Mutex<OutputTail>,
}

impl RunContext {
    fn emit_log(&self, record: LogRecord) {
        self.output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(&record);
        self.sink.emit(UiEvent::Log {
            key: self.key.clone(),
            run_id: self.run_id.clone(),
            record,
        });
    }

    fn failure_text(&self) -> Option<String> {
        self.output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .failure_text()
    }
}

/// 终止事件的唯一出口：`finish` 消耗自身，未 finish 就被丢弃时由 Drop 补发失败结果
struct RunCompletion {
    context: Arc<RunContext>,
    registry: Arc<Mutex<ProcessRegistry>>,
    start_instant: Instant,
    finished: bool,
}

impl RunCompletion {
    fn finish(
        mut self,
        status: RunStatus,
        exit_code: Option<i32>,
        stopped: bool,
        error: Option<String>,
    ) {
        self.finished = true;
        self.deliver(status, exit_code, stopped, error);
    }

    fn deliver(
        &self,
        status: RunStatus,
        exit_code: Option<i32>,
        stopped: bool,
        error: Option<String>,
    ) {
        let ctx = &self.context;
        let duration_ms = self.start_instant.elapsed().as_millis() as u64;
        lock_registry(&self.registry).unregister_run(&ctx.key, &ctx.run_id);

        let success = status == RunStatus::Completed;
        let error_output = if success {
            None
        } else {
            error.or_else(|| ctx.failure_text())
        };

        let outcome = RunOutcome {
            key: ctx.key.clone(),
            run_id: ctx.run_id.clone(),
            status,
            success,
            exit_code,
            duration_ms,
            stopped,
            error_output,
        };

        log::info!(
            "[ProcessSupervisor] {} finished: {:?} exit_code={:?} after {}",
            ctx.key,
            outcome.status,
            outcome.exit_code,
            outcome.duration_label()
        );

        let notification = outcome_notification(&outcome);
        ctx.sink.emit(UiEvent::Terminal {
            key: ctx.key.clone(),
            outcome,
        });
        ctx.sink.emit(notification);
    }
}

impl Drop for RunCompletion {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.deliver(
                RunStatus::Failed,
                None,
                false,
                Some("process supervision ended unexpectedly".to_string()),
            );
        }
    }
}

fn outcome_notification(outcome: &RunOutcome) -> UiEvent {
    let duration = outcome.duration_label();
    match outcome.status {
        RunStatus::Completed => UiEvent::notification(
            "Pipeline completed",
            format!("{} finished in {}", outcome.key, duration),
            LogLevel::Success,
        ),
        RunStatus::SpawnError => UiEvent::notification(
            "Pipeline failed to start",
            outcome
                .error_output
                .clone()
                .unwrap_or_else(|| format!("{} could not be started", outcome.key)),
            LogLevel::Error,
        ),
        RunStatus::Failed => {
            let mut body = match (outcome.stopped, outcome.exit_code) {
                (true, _) => format!("{} stopped after {}", outcome.key, duration),
                (false, Some(code)) => {
                    format!("{} exited with code {} after {}", outcome.key, code, duration)
                }
                (false, None) => format!("{} terminated after {}", outcome.key, duration),
            };
            if let Some(last) = outcome
                .error_output
                .as_deref()
                .and_then(|text| text.lines().last())
            {
                body.push('\n');
                body.push_str(last);
            }
            UiEvent::notification("Pipeline failed", body, LogLevel::Error)
        }
    }
}

async fn supervise(
    mut child: Child,
    mut stop_rx: oneshot::Receiver<()>,
    completion: RunCompletion,
    drain_timeout: Duration,
) {
    let readers: Vec<JoinHandle<()>> = [
        child
            .stdout
            .take()
            .map(|out| spawn_reader(out, StreamKind::Stdout, completion.context.clone())),
        child
            .stderr
            .take()
            .map(|err| spawn_reader(err, StreamKind::Stderr, completion.context.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut stop_armed = true;
    let mut stopped = false;
    let waited = loop {
        tokio::select! {
            status = child.wait() => break status,
            signal = &mut stop_rx, if stop_armed => {
                stop_armed = false;
                // 发送端被直接丢弃（非 stop）时不终止进程
                if signal.is_ok() {
                    stopped = true;
                    terminate_child(&mut child).await;
                }
            }
        }
    };

    // 所有日志送出之后才发终止事件
    for reader in readers {
        drain_reader(reader, drain_timeout).await;
    }

    match waited {
        Ok(status) => {
            let status_kind = if status.success() {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            };
            completion.finish(status_kind, status.code(), stopped, None);
        }
        Err(e) => {
            completion.finish(
                RunStatus::Failed,
                None,
                stopped,
                Some(format!("waiting for process failed: {}", e)),
            );
        }
    }
}

async fn terminate_child(child: &mut Child) {
    let Some(pid) = child.id() else {
        // 已经退出
        return;
    };

    let result = tokio::task::spawn_blocking(move || terminate_process_tree(pid)).await;
    let failure = match result {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => e.to_string(),
    };

    log::warn!(
        "[ProcessSupervisor] signalling pid {} failed: {}, killing directly",
        pid,
        failure
    );
    if let Err(e) = child.start_kill() {
        log::warn!("[ProcessSupervisor] kill pid {} failed: {}", pid, e);
    }
}

fn spawn_reader<R>(mut stream: R, kind: StreamKind, context: Arc<RunContext>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut decoder = LineDecoder::new(kind);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    for record in decoder.push(&buf[..n]) {
                        context.emit_log(record);
                    }
                }
                Err(e) => {
                    log::warn!(
                        "[ProcessSupervisor] {:?} read failed for {}: {}",
                        kind,
                        context.key,
                        e
                    );
                    let mut record =
                        LogRecord::plain(kind, format!("{:?} stream read failed: {}", kind, e));
                    record.level = LogLevel::Error;
                    context.emit_log(record);
                    break;
                }
            }
        }

        for record in decoder.finish() {
            context.emit_log(record);
        }
    })
}

async fn drain_reader(mut reader: JoinHandle<()>, drain_timeout: Duration) {
    if tokio::time::timeout(drain_timeout, &mut reader).await.is_err() {
        // 孙进程仍持有管道时放弃剩余输出
        reader.abort();
        let _ = reader.await;
    }
}
