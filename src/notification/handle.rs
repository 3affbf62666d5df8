//! 共享存储句柄 - 多个任务共用一个存储，修改后广播快照

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use super::store::{NotificationSnapshot, NotificationStore};

/// 共享存储句柄
///
/// 推送任务、拉取任务与 UI 回调都通过它修改同一个存储。
/// 锁只在同步的修改期间持有，从不跨越 `.await`。
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<NotificationStore>>,
    changes: Arc<watch::Sender<NotificationSnapshot>>,
}

impl StoreHandle {
    pub fn new(store: NotificationStore) -> Self {
        let (changes, _) = watch::channel(store.snapshot());
        Self {
            inner: Arc::new(Mutex::new(store)),
            changes: Arc::new(changes),
        }
    }

    /// 订阅快照变化
    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.changes.subscribe()
    }

    /// 执行一次修改并广播新快照
    pub fn update<R>(&self, f: impl FnOnce(&mut NotificationStore) -> R) -> R {
        let (result, snapshot) = {
            let mut store = self.lock();
            let result = f(&mut *store);
            (result, store.snapshot())
        };
        self.changes.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }

    /// 只读访问
    pub fn read<R>(&self, f: impl FnOnce(&NotificationStore) -> R) -> R {
        f(&*self.lock())
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.read(|store| store.snapshot())
    }

    fn lock(&self) -> MutexGuard<'_, NotificationStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new(NotificationStore::new())
    }
}
