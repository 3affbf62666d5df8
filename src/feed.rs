//! 通知列表拉取与响应归一化
//!
//! 后端可能返回裸数组，也可能返回带 `results` 字段的分页信封。

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{BackendError, NotificationBackend};
use crate::notification::{NotificationRecord, WireNotification};

/// 拉取失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("failed to load notifications: {0}")]
    Backend(#[from] BackendError),
    #[error("unexpected notification list shape: {0}")]
    Shape(String),
}

impl FeedError {
    /// 凭证失效导致的失败
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, FeedError::Backend(e) if e.is_auth_failure())
    }
}

/// 通知列表拉取器
#[derive(Clone)]
pub struct FeedFetcher {
    backend: Arc<dyn NotificationBackend>,
}

impl FeedFetcher {
    pub fn new(backend: Arc<dyn NotificationBackend>) -> Self {
        Self { backend }
    }

    /// 拉取一页服务端通知
    ///
    /// 失败时不产生任何记录，错误交给调用方处理（存储保持不变）。
    pub async fn fetch_page(&self) -> Result<Vec<NotificationRecord>, FeedError> {
        let value = self.backend.fetch_notifications().await.map_err(|e| {
            warn!(error = %e, "Notification fetch failed");
            FeedError::from(e)
        })?;
        let records = normalize_page(value)?;
        debug!(count = records.len(), "Notification page fetched");
        Ok(records)
    }
}

/// 把两种响应形状归一化为记录列表
///
/// 单条格式错误的记录会被跳过并记录日志，不影响整页。
pub fn normalize_page(value: Value) -> Result<Vec<NotificationRecord>, FeedError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut envelope) => match envelope.remove("results") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(FeedError::Shape(format!(
                    "results is not an array: {}",
                    other
                )))
            }
        },
        other => return Err(FeedError::Shape(other.to_string())),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<WireNotification>(item) {
            Ok(wire) => Some(NotificationRecord::from(wire)),
            Err(e) => {
                warn!(error = %e, "Skipping malformed notification in page");
                None
            }
        })
        .collect())
}
