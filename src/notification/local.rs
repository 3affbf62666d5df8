//! 本地通知 - 客户端生成、不持久化的提示（如“操作成功”）

use super::handle::StoreHandle;
use super::record::{NotificationId, NotificationKind};

/// 本地通知器
///
/// 只是 `ingest_local` 的便捷包装，没有网络交互和状态机。
#[derive(Clone)]
pub struct LocalNotifier {
    store: StoreHandle,
}

impl LocalNotifier {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// 生成一条本地通知，存储已销毁时返回 `None`
    pub fn notify(
        &self,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
    ) -> Option<NotificationId> {
        let (title, message) = (title.into(), message.into());
        self.store.update(|store| store.ingest_local(title, message, kind))
    }

    pub fn info(&self, title: impl Into<String>, message: impl Into<String>) -> Option<NotificationId> {
        self.notify(title, message, NotificationKind::Info)
    }

    pub fn success(&self, title: impl Into<String>, message: impl Into<String>) -> Option<NotificationId> {
        self.notify(title, message, NotificationKind::Success)
    }

    pub fn warning(&self, title: impl Into<String>, message: impl Into<String>) -> Option<NotificationId> {
        self.notify(title, message, NotificationKind::Warning)
    }

    pub fn error(&self, title: impl Into<String>, message: impl Into<String>) -> Option<NotificationId> {
        self.notify(title, message, NotificationKind::Error)
    }
}
