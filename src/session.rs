//! 会话存活检查 - 定期调用身份确认接口
//!
//! 任何一次检查失败（凭证被拒绝或网络故障）都视为会话不再有效，
//! 是否重新登录由调用方决定。失败原因仍然分开记录，便于上层区分。

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, NotificationBackend};

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// 凭证被后端拒绝
    Unauthorized,
    /// 身份接口不可达或返回异常
    Unreachable,
    /// 主动销毁
    Stopped,
}

impl From<&BackendError> for SessionEndReason {
    fn from(e: &BackendError) -> Self {
        if e.is_auth_failure() {
            SessionEndReason::Unauthorized
        } else {
            SessionEndReason::Unreachable
        }
    }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// 监控器是否认为会话有效
    pub active: bool,
    /// 结束原因（有效时为 None）
    pub ended: Option<SessionEndReason>,
}

impl SessionState {
    pub fn active() -> Self {
        Self {
            active: true,
            ended: None,
        }
    }

    pub fn ended(reason: SessionEndReason) -> Self {
        Self {
            active: false,
            ended: Some(reason),
        }
    }
}

/// 会话监控器
pub struct SessionMonitor {
    backend: Arc<dyn NotificationBackend>,
    state: Arc<watch::Sender<SessionState>>,
    task: Option<JoinHandle<()>>,
}

impl SessionMonitor {
    /// 创建监控器，会话初始为有效
    pub fn new(backend: Arc<dyn NotificationBackend>) -> Self {
        let (state, _) = watch::channel(SessionState::active());
        Self {
            backend,
            state: Arc::new(state),
            task: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// 订阅会话状态（失效即为销毁信号）
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// 开始定期检查
    ///
    /// `check_immediately` 为 true 时启动后立即检查一次，否则第一次检查在一个间隔之后。
    /// 已在运行或会话已失效时为无操作。
    pub fn start(&mut self, interval: Duration, check_immediately: bool) {
        if self.is_running() {
            debug!("Session monitor already running");
            return;
        }
        if !self.state().active {
            warn!("Session already ended, monitor not started");
            return;
        }

        info!(
            interval_secs = interval.as_secs(),
            check_immediately, "Session monitor started"
        );
        let backend = self.backend.clone();
        let state = self.state.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !check_immediately {
                ticker.tick().await;
            }

            loop {
                ticker.tick().await;
                if !state.borrow().active {
                    break;
                }
                if !run_check(backend.as_ref(), &state).await {
                    break;
                }
            }
            debug!("Session monitor loop exited");
        }));
    }

    /// 停止定时器，可重复调用
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Session monitor stopped");
        }
    }

    /// 立即检查一次，返回会话是否仍然有效
    pub async fn check_now(&self) -> bool {
        if !self.state().active {
            return false;
        }
        run_check(self.backend.as_ref(), &self.state).await
    }

    /// 主动结束会话
    pub fn end(&self, reason: SessionEndReason) {
        end_session(&self.state, reason);
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_check(backend: &dyn NotificationBackend, state: &watch::Sender<SessionState>) -> bool {
    match backend.confirm_identity().await {
        Ok(()) => {
            debug!("Session confirmed");
            true
        }
        Err(e) => {
            warn!(error = %e, "Session check failed, invalidating session");
            end_session(state, SessionEndReason::from(&e));
            false
        }
    }
}

/// 只有有效会话会被结束，先到的原因生效
fn end_session(state: &watch::Sender<SessionState>, reason: SessionEndReason) {
    state.send_if_modified(|current| {
        if !current.active {
            return false;
        }
        *current = SessionState::ended(reason);
        true
    });
}
