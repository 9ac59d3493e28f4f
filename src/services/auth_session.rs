use crate::error::AuthError;
use crate::models::{
    ActivityKind, AuthAttemptState, AuthChangeReason, AuthPolicy, LogLevel, Role,
    SessionSnapshot, UiEvent,
};
use crate::services::{CredentialStore, CredentialsConfig, EventSink, SettingsProvider};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// 配置里的超大秒数按此封顶
const MAX_TIMER_SPAN: Duration = Duration::from_secs(365 * 24 * 60 * 60);
const MAX_TRACKED_USERNAMES: usize = 256;

#[derive(Debug)]
struct Session {
    role: Role,
    login_time: DateTime<Utc>,
    /// 始终等于最后一次有效活动 + 超时时长
    idle_deadline: Instant,
    last_reschedule: Instant,
    warned: bool,
}

#[derive(Default)]
struct AuthInner {
    attempts: HashMap<String, AuthAttemptState>,
    session: Option<Session>,
    watcher: Option<JoinHandle<()>>,
    /// 每次登录 +1，旧的超时任务据此退出
    generation: u64,
}

impl AuthInner {
    fn end_session(&mut self) -> Option<Session> {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.session.take()
    }

    fn prune_attempts(&mut self, now: Instant, credentials: &CredentialsConfig) {
        self.attempts
            .retain(|_, state| state.failure_count > 0 || state.remaining_lock(now).is_some());
        if self.attempts.len() >= MAX_TRACKED_USERNAMES {
            // 不存在的用户名即使锁定也没有保护对象
            self.attempts
                .retain(|username, _| credentials.role_for(username).is_some());
        }
    }
}

/// 登录、锁定和空闲超时
#[derive(Clone)]
pub struct AuthSessionMachine {
    inner: Arc<Mutex<AuthInner>>,
    settings: Arc<dyn SettingsProvider>,
    credentials: Arc<dyn CredentialStore>,
    sink: Arc<dyn EventSink>,
    policy: AuthPolicy,
    wake: Arc<Notify>,
}

fn lock(inner: &Mutex<AuthInner>) -> MutexGuard<'_, AuthInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deadline_after(now: Instant, span: Duration) -> Instant {
    now + span.min(MAX_TIMER_SPAN)
}

impl AuthSessionMachine {
    /// 锁定和超时参数在创建时从配置读取
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        credentials: Arc<dyn CredentialStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let policy = settings.snapshot().auth;
        Self {
            inner: Arc::new(Mutex::new(AuthInner::default())),
            settings,
            credentials,
            sink,
            policy,
            wake: Arc::new(Notify::new()),
        }
    }

    pub async fn attempt_login(&self, username: &str, password: &str) -> Result<Role, AuthError> {
        let now = Instant::now();
        {
            let mut inner = lock(&self.inner);
            if let Some(state) = inner.attempts.get_mut(username) {
                if let Some(remaining) = state.remaining_lock(now) {
                    log::warn!("[AuthSession] login rejected for {}: account locked", username);
                    return Err(AuthError::AccountLocked {
                        remaining_seconds: ceil_secs(remaining),
                    });
                }
                // 锁定期已过
                state.locked_until = None;
            }
        }

        let credentials = self.settings.snapshot().credentials;
        let matched = match credentials.role_for(username) {
            Some((role, stored)) => self
                .credentials
                .verify(password, &stored.password)
                .await
                .then_some(role),
            None => None,
        };

        match matched {
            Some(role) => {
                self.start_session(username, role);
                Ok(role)
            }
            None => {
                self.record_failure(username, &credentials);
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    fn record_failure(&self, username: &str, credentials: &CredentialsConfig) {
        let now = Instant::now();
        let mut inner = lock(&self.inner);
        if !inner.attempts.contains_key(username) {
            inner.prune_attempts(now, credentials);
        }

        let state = inner
            .attempts
            .entry(username.to_string())
            .or_insert_with(|| AuthAttemptState::new(username));
        state.failure_count += 1;

        if state.failure_count >= self.policy.max_attempts {
            state.locked_until = Some(deadline_after(
                now,
                Duration::from_secs(self.policy.lockout_secs),
            ));
            state.failure_count = 0;
            log::warn!(
                "[AuthSession] {} locked for {}s after {} failed attempts",
                username,
                self.policy.lockout_secs,
                self.policy.max_attempts
            );
        } else {
            log::info!(
                "[AuthSession] failed login for {} ({}/{})",
                username,
                state.failure_count,
                self.policy.max_attempts
            );
        }
    }

    fn start_session(&self, username: &str, role: Role) {
        let now = Instant::now();
        let generation = {
            let mut inner = lock(&self.inner);
            inner.attempts.remove(username);
            inner.end_session();
            inner.generation += 1;
            inner.session = Some(Session {
                role,
                login_time: Utc::now(),
                idle_deadline: deadline_after(now, self.timeout()),
                last_reschedule: now,
                warned: false,
            });
            inner.generation
        };

        let watcher = tokio::spawn(watch_idle(
            self.inner.clone(),
            self.sink.clone(),
            self.wake.clone(),
            self.policy.clone(),
            generation,
        ));
        {
            let mut inner = lock(&self.inner);
            if inner.generation == generation && inner.session.is_some() {
                inner.watcher = Some(watcher);
            } else {
                watcher.abort();
            }
        }

        log::info!("[AuthSession] {} logged in as {:?}", username, role);
        self.sink.emit(UiEvent::AuthChanged {
            role: Some(role),
            reason: AuthChangeReason::Login,
        });
    }

    /// 主动退出，总是发出 user-initiated
    pub fn logout(&self) {
        let ended = lock(&self.inner).end_session();
        if let Some(session) = &ended {
            log::info!("[AuthSession] {:?} logged out", session.role);
        }
        self.sink.emit(UiEvent::AuthChanged {
            role: None,
            reason: AuthChangeReason::UserInitiated,
        });
    }

    /// 用户活动。每次有效活动都把截止时间推到 now + 超时；
    /// 返回值表示是否唤醒了超时任务重新计算（警告期外按节流间隔）。
    pub fn record_activity(&self, kind: ActivityKind) -> bool {
        if !kind.is_qualifying() {
            return false;
        }

        let now = Instant::now();
        let mut inner = lock(&self.inner);
        let Some(session) = inner.session.as_mut() else {
            return false;
        };
        if now >= session.idle_deadline {
            // 已到期，等待超时任务登出
            return false;
        }

        let in_warning_window =
            session.idle_deadline.saturating_duration_since(now) <= self.warning();
        session.idle_deadline = deadline_after(now, self.timeout());
        session.warned = false;

        let throttled = now.saturating_duration_since(session.last_reschedule)
            < Duration::from_secs(self.policy.activity_throttle_secs);
        if throttled && !in_warning_window {
            return false;
        }

        session.last_reschedule = now;
        drop(inner);
        self.wake.notify_one();
        true
    }

    pub fn current_role(&self) -> Option<Role> {
        lock(&self.inner).session.as_ref().map(|s| s.role)
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        match self.current_role() {
            Some(Role::Admin) => Ok(()),
            _ => Err(AuthError::AdminRequired),
        }
    }

    pub fn session(&self) -> Option<SessionSnapshot> {
        let now = Instant::now();
        lock(&self.inner).session.as_ref().map(|s| SessionSnapshot {
            role: s.role,
            login_time: s.login_time,
            remaining_seconds: ceil_secs(s.idle_deadline.saturating_duration_since(now)),
        })
    }

    pub fn attempt_state(&self, username: &str) -> Option<AuthAttemptState> {
        lock(&self.inner).attempts.get(username).cloned()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.policy.session_timeout_secs)
    }

    fn warning(&self) -> Duration {
        Duration::from_secs(self.policy.session_warning_secs)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

enum IdleStep {
    Sleep(Instant),
    Warn(u64),
    Expire,
    Exit,
}

/// 单个会话的超时任务：活动只改截止时间，任务醒来后重新计算
async fn watch_idle(
    inner: Arc<Mutex<AuthInner>>,
    sink: Arc<dyn EventSink>,
    wake: Arc<Notify>,
    policy: AuthPolicy,
    generation: u64,
) {
    let warning = Duration::from_secs(policy.session_warning_secs);

    loop {
        let step = {
            let mut guard = lock(&inner);
            let now = Instant::now();
            let step = if guard.generation != generation {
                IdleStep::Exit
            } else {
                match guard.session.as_mut() {
                    None => IdleStep::Exit,
                    Some(session) if now >= session.idle_deadline => IdleStep::Expire,
                    Some(session) if session.warned => IdleStep::Sleep(session.idle_deadline),
                    Some(session) => {
                        let warn_at = session
                            .idle_deadline
                            .checked_sub(warning)
                            .unwrap_or(session.idle_deadline);
                        if now >= warn_at {
                            session.warned = true;
                            IdleStep::Warn(ceil_secs(session.idle_deadline - now))
                        } else {
                            IdleStep::Sleep(warn_at)
                        }
                    }
                }
            };

            if let IdleStep::Expire = step {
                guard.session = None;
                // 当前任务自身，不 abort
                guard.watcher = None;
            }
            step
        };

        match step {
            IdleStep::Sleep(until) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(until) => {}
                    _ = wake.notified() => {}
                }
            }
            IdleStep::Warn(remaining_seconds) => {
                log::info!("[AuthSession] session expires in {}s", remaining_seconds);
                sink.emit(UiEvent::SessionWarning { remaining_seconds });
                sink.emit(UiEvent::notification(
                    "Session expiring",
                    format!(
                        "You will be logged out in {} minute(s) due to inactivity",
                        remaining_seconds.div_ceil(60)
                    ),
                    LogLevel::Warning,
                ));
            }
            IdleStep::Expire => {
                log::info!("[AuthSession] session expired after inactivity");
                sink.emit(UiEvent::AuthChanged {
                    role: None,
                    reason: AuthChangeReason::Expired,
                });
                sink.emit(UiEvent::notification(
                    "Session expired",
                    "You have been logged out due to inactivity",
                    LogLevel::Warning,
                ));
                return;
            }
            IdleStep::Exit => return,
        }
    }
}
