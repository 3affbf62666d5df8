//! 通知中心 - 子系统根对象，负责组件装配与生命周期
//!
//! 启动顺序：拉取首页 → 打开推送通道 → 启动会话监控 → 启动监督任务。
//! 监督任务把推送记录写入存储，按重连策略重开意外断开的通道，
//! 并在会话失效时关闭通道、销毁存储。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{NotificationBackend, SpawnedAcknowledger};
use crate::config::ClientConfig;
use crate::feed::{FeedError, FeedFetcher};
use crate::notification::{
    LocalNotifier, NotificationId, NotificationSnapshot, StoreError, StoreHandle,
};
use crate::push::{ChannelEvent, ChannelState, PushChannel, PushError, ReconnectPolicy};
use crate::session::{SessionEndReason, SessionMonitor, SessionState};

/// 启动失败（配置或调用契约问题）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CenterError {
    #[error("no session token configured")]
    MissingToken,
    #[error(transparent)]
    Push(#[from] PushError),
    #[error("notification center already stopped")]
    Stopped,
}

/// 启动结果
#[derive(Debug)]
pub struct StartReport {
    /// 首页拉取结果（记录数或失败原因）
    pub initial_fetch: Result<usize, FeedError>,
}

type SharedChannel = Arc<Mutex<PushChannel>>;

fn lock_channel(channel: &SharedChannel) -> MutexGuard<'_, PushChannel> {
    channel.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 通知中心
pub struct NotificationCenter {
    config: ClientConfig,
    backend: Arc<dyn NotificationBackend>,
    store: StoreHandle,
    feed: FeedFetcher,
    channel: SharedChannel,
    channel_events: Option<mpsc::Receiver<ChannelEvent>>,
    monitor: SessionMonitor,
    supervisor: Option<JoinHandle<()>>,
    started: bool,
    stopped: bool,
}

impl NotificationCenter {
    pub fn new(config: ClientConfig, backend: Arc<dyn NotificationBackend>) -> Self {
        let (channel, channel_events) = PushChannel::new(config.clone());
        Self {
            feed: FeedFetcher::new(backend.clone()),
            monitor: SessionMonitor::new(backend.clone()),
            store: StoreHandle::default(),
            channel: Arc::new(Mutex::new(channel)),
            channel_events: Some(channel_events),
            supervisor: None,
            started: false,
            stopped: false,
            config,
            backend,
        }
    }

    /// 启动子系统，重复调用为无操作
    pub async fn start(&mut self) -> Result<StartReport, CenterError> {
        if self.stopped {
            return Err(CenterError::Stopped);
        }
        let token = self.config.token.clone().ok_or(CenterError::MissingToken)?;
        if self.started {
            debug!("Notification center already started");
            return Ok(StartReport {
                initial_fetch: Ok(self.store.snapshot().len()),
            });
        }

        let acknowledger = Arc::new(SpawnedAcknowledger::new(self.backend.clone()));
        self.store.update(|store| store.set_acknowledger(acknowledger));

        let initial_fetch = self.refresh().await;

        lock_channel(&self.channel).open(&token)?;
        self.monitor.start(
            self.config.session_check_interval(),
            self.config.session_check_on_start,
        );

        if let Some(events) = self.channel_events.take() {
            let supervisor = Supervisor {
                channel: self.channel.clone(),
                store: self.store.clone(),
                session: self.monitor.subscribe(),
                policy: self.config.reconnect,
                token,
            };
            self.supervisor = Some(tokio::spawn(supervisor.run(events)));
        }

        self.started = true;
        info!("Notification center started");
        Ok(StartReport { initial_fetch })
    }

    /// 停止子系统：停止定时器、关闭通道、销毁存储，可重复调用
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.monitor.stop();
        self.monitor.end(SessionEndReason::Stopped);
        lock_channel(&self.channel).close();
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
        self.store.update(|store| store.tear_down());
        if self.started {
            info!("Notification center stopped");
        }
    }

    /// 拉取一页并合并，返回页面中的记录数
    ///
    /// 失败时存储不变；存储已销毁时结果被静默丢弃。
    pub async fn refresh(&self) -> Result<usize, FeedError> {
        let page = self.feed.fetch_page().await?;
        let count = page.len();
        self.store.update(|store| store.ingest_fetched_page(page));
        Ok(count)
    }

    pub fn mark_read(&self, id: NotificationId) -> Result<bool, StoreError> {
        self.store.update(|store| store.mark_read(id))
    }

    pub fn mark_all_read(&self) -> Result<usize, StoreError> {
        self.store.update(|store| store.mark_all_read())
    }

    /// 本地通知器（与中心共享存储）
    pub fn notifier(&self) -> LocalNotifier {
        LocalNotifier::new(self.store.clone())
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.store.snapshot()
    }

    /// 订阅存储变化
    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.store.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.monitor.state()
    }

    /// 订阅会话状态，失效即需要重新登录
    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.monitor.subscribe()
    }

    pub fn push_state(&self) -> ChannelState {
        lock_channel(&self.channel).state()
    }

    pub fn watch_push_state(&self) -> watch::Receiver<ChannelState> {
        lock_channel(&self.channel).watch_state()
    }

    /// 已启动、未停止且会话仍有效
    pub fn is_running(&self) -> bool {
        self.started && !self.stopped && self.monitor.state().active
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 监督任务
struct Supervisor {
    channel: SharedChannel,
    store: StoreHandle,
    session: watch::Receiver<SessionState>,
    policy: ReconnectPolicy,
    token: String,
}

impl Supervisor {
    async fn run(mut self, mut events: mpsc::Receiver<ChannelEvent>) {
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                changed = self.session.changed() => {
                    if changed.is_err() || !self.session.borrow().active {
                        self.tear_down();
                        return;
                    }
                }
                event = events.recv() => match event {
                    Some(ChannelEvent::Notification(record)) => {
                        self.store.update(|store| store.ingest_pushed(record));
                    }
                    Some(ChannelEvent::Dropped { reason, open_for }) => {
                        attempt = self.policy.next_attempt(attempt, open_for);
                        if !self.reconnect(attempt, &reason).await {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }

    /// 按策略等待后重开通道，会话在等待期间失效时返回 false
    async fn reconnect(&mut self, attempt: u32, reason: &str) -> bool {
        if !self.session.borrow().active {
            return true;
        }
        let Some(delay) = self.policy.delay_for(attempt) else {
            warn!(attempts = attempt - 1, reason, "Push channel reconnect attempts exhausted, staying closed");
            return true;
        };

        info!(attempt, delay_ms = delay.as_millis() as u64, reason, "Reopening push channel");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = self.session.changed() => {
                if changed.is_err() || !self.session.borrow().active {
                    self.tear_down();
                    return false;
                }
            }
        }

        if let Err(e) = lock_channel(&self.channel).open(&self.token) {
            warn!(error = %e, "Push channel reopen failed");
        }
        true
    }

    fn tear_down(&self) {
        let reason = self.session.borrow().ended;
        info!(reason = ?reason, "Session ended, tearing down notifications");
        lock_channel(&self.channel).close();
        self.store.update(|store| store.tear_down());
    }
}
