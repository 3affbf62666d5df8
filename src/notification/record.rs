//! 通知记录 - 数据模型与线上格式
//!
//! 后端 REST 列表和推送通道使用同一种 JSON 记录格式，
//! 这里统一解码为 [`NotificationRecord`]。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 通知 ID
///
/// 服务端 ID 与本地 ID 属于两个互不相交的空间，枚举本身保证它们不会相等。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "space", content = "value", rename_all = "snake_case")]
pub enum NotificationId {
    /// 服务端分配的 ID
    Server(i64),
    /// 客户端生成的本地 ID（单调递增）
    Local(u64),
}

impl NotificationId {
    pub fn is_local(&self) -> bool {
        matches!(self, NotificationId::Local(_))
    }

    /// 服务端 ID（本地记录返回 None）
    pub fn server_id(&self) -> Option<i64> {
        match self {
            NotificationId::Server(id) => Some(*id),
            NotificationId::Local(_) => None,
        }
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationId::Server(id) => write!(f, "{}", id),
            NotificationId::Local(id) => write!(f, "local-{}", id),
        }
    }
}

/// 展示类别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }
}

impl From<&str> for NotificationKind {
    /// 未知类别一律按 info 处理
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "success" => NotificationKind::Success,
            "warning" | "warn" => NotificationKind::Warning,
            "error" | "danger" => NotificationKind::Error,
            _ => NotificationKind::Info,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(value: String) -> Self {
        NotificationKind::from(value.as_str())
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 记录来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// 存在于后端，刷新后仍然存在
    Persisted,
    /// 仅客户端存在，从不发送到后端
    Local,
}

/// 通知记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
}

impl NotificationRecord {
    /// 构造一条服务端记录
    pub fn persisted(
        id: i64,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
        is_read: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::Server(id),
            title: title.into(),
            message: message.into(),
            kind,
            is_read,
            created_at,
            origin: Origin::Persisted,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }
}

/// 线上格式（REST 列表与推送消息共用）
///
/// 字段名兼容 snake_case 与 camelCase 两种写法。
#[derive(Debug, Clone, Deserialize)]
pub struct WireNotification {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "type", alias = "notification_type")]
    pub kind: NotificationKind,
    #[serde(default, alias = "isRead")]
    pub is_read: bool,
    #[serde(default = "Utc::now", alias = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<WireNotification> for NotificationRecord {
    /// 线上记录一律视为服务端记录
    fn from(wire: WireNotification) -> Self {
        NotificationRecord::persisted(
            wire.id,
            wire.title,
            wire.message,
            wire.kind,
            wire.is_read,
            wire.created_at,
        )
    }
}
