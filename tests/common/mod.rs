//! 集成测试共用的模拟后端与本地推送服务

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use property_notify::{BackendError, ClientConfig, NotificationBackend, ReconnectPolicy};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

/// 在超时内等待 watch 值满足条件
pub async fn wait_until<T>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("sender dropped");
}

/// 一条后端格式的通知
pub fn wire(id: i64, title: &str, is_read: bool, created_at: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "message": format!("{} body", title),
        "type": "info",
        "is_read": is_read,
        "created_at": created_at,
    })
}

/// 可编排的模拟后端
pub struct MockBackend {
    page: Mutex<Value>,
    fail_fetch: Mutex<Option<BackendError>>,
    identity: Mutex<VecDeque<Result<(), BackendError>>>,
    marked: Mutex<Vec<i64>>,
    pub fetch_calls: AtomicUsize,
    pub identity_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(page: Value) -> Arc<Self> {
        Arc::new(Self {
            page: Mutex::new(page),
            fail_fetch: Mutex::new(None),
            identity: Mutex::new(VecDeque::new()),
            marked: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            identity_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_page(&self, page: Value) {
        *self.page.lock().unwrap() = page;
    }

    pub fn fail_fetch_with(&self, error: Option<BackendError>) {
        *self.fail_fetch.lock().unwrap() = error;
    }

    /// 依次返回的身份检查结果，用完后一直成功
    pub fn script_identity(&self, results: Vec<Result<(), BackendError>>) {
        *self.identity.lock().unwrap() = results.into();
    }

    pub fn marked(&self) -> Vec<i64> {
        self.marked.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationBackend for MockBackend {
    async fn fetch_notifications(&self) -> Result<Value, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_fetch.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.page.lock().unwrap().clone())
    }

    async fn mark_read(&self, id: i64) -> Result<(), BackendError> {
        self.marked.lock().unwrap().push(id);
        Ok(())
    }

    async fn unread_count(&self) -> Result<u64, BackendError> {
        let page = self.page.lock().unwrap().clone();
        let count = page
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| !item["is_read"].as_bool().unwrap_or(false))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn confirm_identity(&self) -> Result<(), BackendError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        self.identity.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[derive(Debug, Clone)]
enum ServerCommand {
    Send(String),
    Drop,
}

/// 本地 WebSocket 推送服务
///
/// 每个连接在握手前订阅命令广播，握手完成后转发消息或断开。
pub struct PushServer {
    addr: SocketAddr,
    commands: broadcast::Sender<ServerCommand>,
    uris: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl PushServer {
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// 每个连接握手成功后 `delay` 即由服务端关闭
    pub async fn start_closing_after(delay: Duration) -> Self {
        Self::spawn(Some(delay)).await
    }

    async fn spawn(close_after: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel(64);
        let uris = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let commands = commands.clone();
            let uris = uris.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let rx = commands.subscribe();
                    let uris = uris.clone();
                    let connections = connections.clone();
                    tokio::spawn(serve_connection(stream, rx, uris, connections, close_after));
                }
            })
        };

        Self {
            addr,
            commands,
            uris,
            connections,
            task,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// 指向本服务的配置，API 地址不会被访问
    pub fn config(&self, token: &str) -> ClientConfig {
        ClientConfig {
            api_base_url: "http://127.0.0.1:1".to_string(),
            ws_base_url: self.ws_url(),
            token: Some(token.to_string()),
            session_check_interval_secs: 3600,
            session_check_on_start: false,
            request_timeout_secs: 5,
            reconnect: ReconnectPolicy {
                max_attempts: 5,
                base_delay_ms: 50,
                max_delay_ms: 200,
                stable_after_ms: 1000,
            },
        }
    }

    pub fn send(&self, text: impl Into<String>) {
        let _ = self.commands.send(ServerCommand::Send(text.into()));
    }

    /// 由服务端关闭所有当前连接
    pub fn drop_connections(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }

    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// 等待累计握手数达到 `n`
    pub async fn wait_connections(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.connections() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for push connection");
    }
}

impl Drop for PushServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    mut commands: broadcast::Receiver<ServerCommand>,
    uris: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    close_after: Option<Duration>,
) {
    let record_uri = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uris.lock().unwrap().push(request.uri().to_string());
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, record_uri).await else {
        return;
    };
    connections.fetch_add(1, Ordering::SeqCst);

    let deadline = async {
        match close_after {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                let _ = ws.close(None).await;
                while let Some(Ok(_)) = ws.next().await {}
                return;
            }
            command = commands.recv() => match command {
                Ok(ServerCommand::Send(text)) => {
                    if ws.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Ok(ServerCommand::Drop) | Err(_) => {
                    let _ = ws.close(None).await;
                    // 等待客户端回应关闭帧
                    while let Some(Ok(_)) = ws.next().await {}
                    return;
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}
