//! 后端 REST 接口 - 通知列表、已读回执、未读数、身份确认
//!
//! `NotificationBackend` 是子系统与 HTTP 之间的接缝，测试中用内存实现替换。

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::notification::ReadAcknowledger;

/// 后端调用错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// 网络不可达、超时等
    #[error("transport error: {0}")]
    Transport(String),
    /// 凭证被拒绝（401/403）
    #[error("unauthorized: {}", .code.as_deref().unwrap_or("no code"))]
    Unauthorized { code: Option<String> },
    /// 其他非 2xx 状态
    #[error("unexpected status {status}")]
    Status { status: u16 },
    /// 响应体无法解析
    #[error("cannot decode response: {0}")]
    Decode(String),
    /// 地址配置错误
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl BackendError {
    /// 是否为凭证失效（与网络故障区分）
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, BackendError::Unauthorized { .. })
    }

    /// 凭证过期的标准错误码
    pub fn is_token_not_valid(&self) -> bool {
        matches!(self, BackendError::Unauthorized { code: Some(code) } if code == "token_not_valid")
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// 通知后端
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// 拉取通知列表（原始 JSON，形状由 FeedFetcher 归一化）
    async fn fetch_notifications(&self) -> Result<serde_json::Value, BackendError>;

    /// 确认服务端记录已读
    async fn mark_read(&self, id: i64) -> Result<(), BackendError>;

    /// 服务端统计的未读数
    async fn unread_count(&self) -> Result<u64, BackendError>;

    /// 确认当前凭证仍被接受（2xx 即有效）
    async fn confirm_identity(&self) -> Result<(), BackendError>;
}

/// 401 响应体
#[derive(Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    code: Option<String>,
}

/// 基于 reqwest 的 HTTP 后端
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: ClientConfig,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        match &self.config.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn get(&self, url: Url) -> Result<Response, BackendError> {
        debug!(url = %url, "GET");
        let response = self.authorize(self.client.get(url)).send().await?;
        check_status(response).await
    }

    async fn post(&self, url: Url) -> Result<Response, BackendError> {
        debug!(url = %url, "POST");
        let response = self.authorize(self.client.post(url)).send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl NotificationBackend for HttpBackend {
    async fn fetch_notifications(&self) -> Result<serde_json::Value, BackendError> {
        let url = self.config.notifications_url().map_err(endpoint_error)?;
        Ok(self.get(url).await?.json().await?)
    }

    async fn mark_read(&self, id: i64) -> Result<(), BackendError> {
        let url = self.config.mark_read_url(id).map_err(endpoint_error)?;
        self.post(url).await?;
        Ok(())
    }

    async fn unread_count(&self) -> Result<u64, BackendError> {
        let url = self.config.unread_count_url().map_err(endpoint_error)?;
        let value: serde_json::Value = self.get(url).await?.json().await?;
        parse_unread_count(&value)
            .ok_or_else(|| BackendError::Decode(format!("No unread count in {}", value)))
    }

    async fn confirm_identity(&self) -> Result<(), BackendError> {
        let url = self.config.identity_url().map_err(endpoint_error)?;
        self.get(url).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let code = response
            .json::<AuthErrorBody>()
            .await
            .ok()
            .and_then(|body| body.code);
        return Err(BackendError::Unauthorized { code });
    }
    Err(BackendError::Status {
        status: status.as_u16(),
    })
}

fn endpoint_error(e: anyhow::Error) -> BackendError {
    BackendError::Endpoint(e.to_string())
}

/// 解析未读数响应：`{"count": n}`、`{"unread_count": n}` 或裸数字
pub fn parse_unread_count(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.get("count").and_then(|v| v.as_u64()))
        .or_else(|| value.get("unread_count").and_then(|v| v.as_u64()))
}

/// 已读回执：spawn 后立即返回，失败只记录日志
pub struct SpawnedAcknowledger {
    backend: Arc<dyn NotificationBackend>,
    runtime: Handle,
}

impl SpawnedAcknowledger {
    /// 必须在 tokio 运行时内创建
    pub fn new(backend: Arc<dyn NotificationBackend>) -> Self {
        Self {
            backend,
            runtime: Handle::current(),
        }
    }
}

impl ReadAcknowledger for SpawnedAcknowledger {
    fn acknowledge(&self, id: i64) {
        let backend = self.backend.clone();
        self.runtime.spawn(async move {
            match backend.mark_read(id).await {
                Ok(()) => debug!(id, "Read state acknowledged"),
                Err(e) => warn!(id, error = %e, "Failed to acknowledge read state, keeping local state"),
            }
        });
    }
}
