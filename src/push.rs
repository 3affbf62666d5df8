//! 推送通道 - 单条 WebSocket 连接上的通知推送
//!
//! 状态机：`Closed —open()→ Connecting —握手成功→ Open —close()/出错→ Closed`
//!
//! 通道本身不做重连循环。意外断开时发出 [`ChannelEvent::Dropped`]，
//! 由上层（`NotificationCenter`）按 [`ReconnectPolicy`] 决定是否重新打开。

use futures::StreamExt;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::notification::{NotificationRecord, WireNotification};

/// 事件队列容量
const EVENT_BUFFER: usize = 100;

/// 通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

/// 通道向上层发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// 服务端推送的新记录（来源已强制为 persisted）
    Notification(NotificationRecord),
    /// 连接意外断开或连接失败（主动 close 不会产生此事件）
    ///
    /// `open_for` 为连接保持 Open 的时长，握手未完成时为 None。
    Dropped {
        reason: String,
        open_for: Option<Duration>,
    },
}

/// 推送通道错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("invalid push endpoint: {0}")]
    InvalidUrl(String),
    #[error("push connection failed: {0}")]
    Connect(String),
    #[error("malformed push payload: {0}")]
    Malformed(String),
}

/// 重连策略（指数退避，次数有上限）
///
/// 只有保持 Open 超过 `stable_after_ms` 的连接才会清零失败计数，
/// 握手后立即被关闭的连接仍然计入连续失败。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub stable_after_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60000,
            stable_after_ms: 30000,
        }
    }
}

impl ReconnectPolicy {
    /// 不重连
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// 第 `attempt` 次重连（从 1 开始）前的等待时间，超过上限返回 None
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }

    /// 一次断开之后的连续失败次数
    pub fn next_attempt(&self, previous: u32, open_for: Option<Duration>) -> u32 {
        match open_for {
            Some(uptime) if uptime >= Duration::from_millis(self.stable_after_ms) => 1,
            _ => previous.saturating_add(1),
        }
    }
}

/// 解析一条推送消息
///
/// 消息与 REST 列表使用同一记录格式；缺省 `is_read` 视为未读。
pub fn parse_push_payload(text: &str) -> Result<NotificationRecord, PushError> {
    serde_json::from_str::<WireNotification>(text)
        .map(NotificationRecord::from)
        .map_err(|e| PushError::Malformed(e.to_string()))
}

/// 带代次的状态：旧连接任务无法覆盖新连接的状态
struct StateCell {
    inner: Mutex<(u64, ChannelState)>,
    tx: watch::Sender<ChannelState>,
}

impl StateCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(ChannelState::Closed);
        Self {
            inner: Mutex::new((0, ChannelState::Closed)),
            tx,
        }
    }

    fn get(&self) -> ChannelState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).1
    }

    /// 开始新的一代连接，进入 Connecting
    fn begin(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.0 += 1;
        inner.1 = ChannelState::Connecting;
        self.tx.send_replace(ChannelState::Connecting);
        inner.0
    }

    /// 作废当前代次，进入 Closed
    fn invalidate(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.0 += 1;
        inner.1 = ChannelState::Closed;
        self.tx.send_replace(ChannelState::Closed);
    }

    /// 仅当代次仍是当前代次时更新，返回是否生效
    fn set(&self, generation: u64, state: ChannelState) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.0 != generation {
            return false;
        }
        inner.1 = state;
        self.tx.send_replace(state);
        true
    }
}

/// 推送通道
pub struct PushChannel {
    config: ClientConfig,
    state: Arc<StateCell>,
    events: mpsc::Sender<ChannelEvent>,
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl PushChannel {
    /// 创建通道，返回通道与事件接收端
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let channel = Self {
            config,
            state: Arc::new(StateCell::new()),
            events,
            task: None,
            shutdown: None,
        };
        (channel, rx)
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.tx.subscribe()
    }

    /// 打开通道
    ///
    /// 已处于 Connecting/Open 时为无操作。连接在后台建立，
    /// 失败时状态回到 Closed 并发出 `Dropped` 事件。
    pub fn open(&mut self, session_token: &str) -> Result<(), PushError> {
        let current = self.state();
        if current != ChannelState::Closed {
            debug!(state = ?current, "Push channel already active, open ignored");
            return Ok(());
        }

        let url = self
            .config
            .push_url(session_token)
            .map_err(|e| PushError::InvalidUrl(e.to_string()))?;

        self.reap();
        let generation = self.state.begin();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(run_connection(
            url.to_string(),
            generation,
            self.state.clone(),
            self.events.clone(),
            shutdown_rx,
        )));
        Ok(())
    }

    /// 关闭通道，可重复调用
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if self.state() != ChannelState::Closed {
            info!("Push channel closed");
        }
        self.state.invalidate();
    }

    /// 回收上一代连接任务
    fn reap(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.close();
        self.reap();
    }
}

async fn run_connection(
    url: String,
    generation: u64,
    state: Arc<StateCell>,
    events: mpsc::Sender<ChannelEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    debug!(generation, "Connecting push channel");

    let connected = tokio::select! {
        _ = &mut shutdown => return,
        result = connect_async(url.as_str()) => result,
    };
    let mut ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let reason = PushError::Connect(e.to_string()).to_string();
            warn!(error = %reason, "Push channel connect failed");
            if state.set(generation, ChannelState::Closed) {
                let _ = events
                    .send(ChannelEvent::Dropped {
                        reason,
                        open_for: None,
                    })
                    .await;
            }
            return;
        }
    };

    if !state.set(generation, ChannelState::Open) {
        let _ = ws.close(None).await;
        return;
    }
    let opened_at = Instant::now();
    info!("Push channel open");

    let reason = loop {
        let message = tokio::select! {
            _ = &mut shutdown => None,
            message = ws.next() => Some(message),
        };
        let Some(message) = message else {
            let _ = ws.close(None).await;
            debug!(generation, "Push connection shut down");
            return;
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Dropping non-UTF-8 push payload");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => format!("closed by server ({}): {}", frame.code, frame.reason),
                    None => "closed by server".to_string(),
                };
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break e.to_string(),
            None => break "connection ended".to_string(),
        };

        match parse_push_payload(&text) {
            Ok(record) => {
                debug!(id = %record.id, "Push notification received");
                if events.send(ChannelEvent::Notification(record)).await.is_err() {
                    debug!("Push event receiver gone, stopping");
                    state.set(generation, ChannelState::Closed);
                    let _ = ws.close(None).await;
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Dropping malformed push payload"),
        }
    };

    let open_for = opened_at.elapsed();
    warn!(reason = %reason, open_ms = open_for.as_millis() as u64, "Push channel dropped");
    if state.set(generation, ChannelState::Closed) {
        let _ = events
            .send(ChannelEvent::Dropped {
                reason,
                open_for: Some(open_for),
            })
            .await;
    }
}
