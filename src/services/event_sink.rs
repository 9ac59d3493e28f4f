use crate::models::{LogLevel, UiEvent};
use tokio::sync::mpsc;

/// 事件出口；发送即完成，不等待界面确认
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: UiEvent);
}

/// 把事件送进 channel，供无界面运行和测试使用
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: UiEvent) {
        // 接收端关闭后事件直接丢弃
        let _ = self.tx.send(event);
    }
}

/// 只写日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: UiEvent) {
        match &event {
            UiEvent::Log { key, record, .. } => match record.level {
                LogLevel::Error => log::error!("[{}] {}", key, record.message),
                LogLevel::Warning => log::warn!("[{}] {}", key, record.message),
                LogLevel::Info | LogLevel::Success => log::info!("[{}] {}", key, record.message),
            },
            UiEvent::Terminal { key, outcome } => log::info!(
                "[{}] finished: success={} exit_code={:?} duration={}",
                key,
                outcome.success,
                outcome.exit_code,
                outcome.duration_label()
            ),
            UiEvent::Notification { payload } => {
                log::info!("[notification] {}: {}", payload.title, payload.body)
            }
            UiEvent::AuthChanged { role, reason } => {
                log::info!("[auth] role={:?} reason={:?}", role, reason)
            }
            UiEvent::SessionWarning { remaining_seconds } => {
                log::warn!("[auth] session expires in {}s", remaining_seconds)
            }
        }
    }
}

#[cfg(feature = "desktop")]
pub use window_sink::WindowSink;

#[cfg(feature = "desktop")]
mod window_sink {
    use super::EventSink;
    use crate::models::UiEvent;

    /// 发送到主窗口，通知类事件同时弹出系统通知
    pub struct WindowSink {
        window: tauri::Window,
        identifier: String,
    }

    impl WindowSink {
        pub fn new(window: tauri::Window, identifier: impl Into<String>) -> Self {
            Self {
                window,
                identifier: identifier.into(),
            }
        }
    }

    impl EventSink for WindowSink {
        fn emit(&self, event: UiEvent) {
            if let UiEvent::Notification { payload } = &event {
                let shown = tauri::api::notification::Notification::new(&self.identifier)
                    .title(&payload.title)
                    .body(&payload.body)
                    .show();
                if let Err(e) = shown {
                    log::warn!("[WindowSink] desktop notification failed: {}", e);
                }
            }

            if let Err(e) = self.window.emit(event.channel(), &event) {
                log::warn!("[WindowSink] emit {} failed: {}", event.channel(), e);
            }
        }
    }
}
