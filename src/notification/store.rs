//! 通知存储 - 内存中的有序通知集合与未读计数
//!
//! 所有修改都经过 `ingest_*` / `mark_read` 几个入口，
//! 每次修改后重新计算 `unread_count`，外部无法直接设置。
//!
//! ## 合并规则
//! 1. 记录按 `created_at` 倒序排列（同一时间按 ID 倒序），不区分来源
//! 2. 拉取的页面按 ID 幂等合并，页面中不存在的记录（本地记录、刚推送的记录）保留
//! 3. 推送记录按 ID 去重，重复投递是无操作
//! 4. 已读状态只会从 false 变为 true，合并时取两边的“或”

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::record::{NotificationId, NotificationKind, NotificationRecord, Origin};

/// 已读回执 - 标记服务端记录为已读后通知后端（发出即忘）
pub trait ReadAcknowledger: Send + Sync {
    /// 确认服务端记录已读，失败不影响本地状态
    fn acknowledge(&self, id: i64);
}

/// 存储契约错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("notification store has been torn down")]
    TornDown,
}

/// 存储快照（只读）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    pub records: Vec<NotificationRecord>,
    pub unread_count: usize,
}

impl NotificationSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: NotificationId) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

/// 通知存储
pub struct NotificationStore {
    records: Vec<NotificationRecord>,
    unread_count: usize,
    next_local_id: u64,
    torn_down: bool,
    acknowledger: Option<Arc<dyn ReadAcknowledger>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            unread_count: 0,
            next_local_id: 1,
            torn_down: false,
            acknowledger: None,
        }
    }

    /// 设置已读回执
    pub fn with_acknowledger(mut self, acknowledger: Arc<dyn ReadAcknowledger>) -> Self {
        self.acknowledger = Some(acknowledger);
        self
    }

    /// 替换已读回执（子系统启动时挂接后端）
    pub fn set_acknowledger(&mut self, acknowledger: Arc<dyn ReadAcknowledger>) {
        self.acknowledger = Some(acknowledger);
    }

    // ===== Getters =====

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: NotificationId) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// 当前有序序列与未读计数
    pub fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            records: self.records.clone(),
            unread_count: self.unread_count,
        }
    }

    // ===== Mutations =====

    /// 合并拉取到的一页服务端记录
    ///
    /// 返回 `false` 表示存储已销毁，输入被忽略。
    pub fn ingest_fetched_page(&mut self, page: Vec<NotificationRecord>) -> bool {
        if self.torn_down {
            debug!(count = page.len(), "Ignoring fetched page for torn-down store");
            return false;
        }

        let mut incoming = HashSet::with_capacity(page.len());
        let mut merged = Vec::with_capacity(page.len() + self.records.len());

        for mut record in page {
            if record.id.is_local() {
                warn!(id = %record.id, "Fetched page contains a local id, skipping");
                continue;
            }
            if !incoming.insert(record.id) {
                continue;
            }
            record.origin = Origin::Persisted;
            if let Some(existing) = self.get(record.id) {
                record.is_read |= existing.is_read;
            }
            merged.push(record);
        }

        merged.extend(
            self.records
                .drain(..)
                .filter(|r| !incoming.contains(&r.id)),
        );
        merged.sort_by(|a, b| order_key(b).cmp(&order_key(a)));

        self.records = merged;
        self.recount();
        debug!(
            total = self.records.len(),
            unread = self.unread_count,
            "Fetched page merged"
        );
        true
    }

    /// 插入一条推送记录，重复 ID 为无操作
    ///
    /// 返回 `true` 表示记录被插入。
    pub fn ingest_pushed(&mut self, mut record: NotificationRecord) -> bool {
        if self.torn_down {
            debug!(id = %record.id, "Ignoring pushed record for torn-down store");
            return false;
        }
        if record.id.is_local() {
            warn!(id = %record.id, "Pushed record carries a local id, dropping");
            return false;
        }
        if self.contains(record.id) {
            debug!(id = %record.id, "Duplicate push delivery ignored");
            return false;
        }

        record.origin = Origin::Persisted;
        self.insert_ordered(record);
        self.recount();
        true
    }

    /// 生成一条本地记录（未读，位于最前）
    ///
    /// 存储已销毁时返回 `None`。
    pub fn ingest_local(
        &mut self,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
    ) -> Option<NotificationId> {
        if self.torn_down {
            debug!("Ignoring local notification for torn-down store");
            return None;
        }

        let id = NotificationId::Local(self.next_local_id);
        self.next_local_id += 1;

        self.insert_ordered(NotificationRecord {
            id,
            title: title.into(),
            message: message.into(),
            kind,
            is_read: false,
            created_at: Utc::now(),
            origin: Origin::Local,
        });
        self.recount();
        Some(id)
    }

    /// 标记已读
    ///
    /// 返回 `Ok(true)` 表示记录从未读变为已读；
    /// 记录不存在或已读返回 `Ok(false)`。
    pub fn mark_read(&mut self, id: NotificationId) -> Result<bool, StoreError> {
        if self.torn_down {
            return Err(StoreError::TornDown);
        }

        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            debug!(id = %id, "mark_read on unknown notification");
            return Ok(false);
        };
        if record.is_read {
            return Ok(false);
        }

        record.is_read = true;
        let server_id = match record.origin {
            Origin::Persisted => record.id.server_id(),
            Origin::Local => None,
        };
        self.recount();

        if let Some(server_id) = server_id {
            self.acknowledge(server_id);
        }
        Ok(true)
    }

    /// 全部标记已读，返回状态发生变化的记录数
    pub fn mark_all_read(&mut self) -> Result<usize, StoreError> {
        if self.torn_down {
            return Err(StoreError::TornDown);
        }

        let mut to_ack = Vec::new();
        let mut changed = 0;
        for record in self.records.iter_mut().filter(|r| !r.is_read) {
            record.is_read = true;
            changed += 1;
            if record.origin == Origin::Persisted {
                if let Some(server_id) = record.id.server_id() {
                    to_ack.push(server_id);
                }
            }
        }
        self.recount();

        for server_id in to_ack {
            self.acknowledge(server_id);
        }
        Ok(changed)
    }

    /// 销毁存储：清空记录，之后的写入全部被忽略
    pub fn tear_down(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.records.clear();
        self.acknowledger = None;
        self.recount();
        debug!("Notification store torn down");
    }

    fn insert_ordered(&mut self, record: NotificationRecord) {
        let key = order_key(&record);
        let pos = self.records.partition_point(|r| order_key(r) > key);
        self.records.insert(pos, record);
    }

    fn recount(&mut self) {
        self.unread_count = self.records.iter().filter(|r| !r.is_read).count();
    }

    fn acknowledge(&self, server_id: i64) {
        match &self.acknowledger {
            Some(ack) => ack.acknowledge(server_id),
            None => debug!(id = server_id, "No acknowledger configured, read state kept local"),
        }
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn order_key(record: &NotificationRecord) -> (chrono::DateTime<Utc>, NotificationId) {
    (record.created_at, record.id)
}
