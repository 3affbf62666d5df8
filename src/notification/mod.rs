//! 通知模块 - 记录模型、有序存储与本地通知
//!
//! # 使用示例
//! ```ignore
//! use property_notify::notification::{LocalNotifier, NotificationKind, StoreHandle};
//!
//! let store = StoreHandle::default();
//! let notifier = LocalNotifier::new(store.clone());
//! notifier.success("Package added", "The package was registered");
//! assert_eq!(store.snapshot().unread_count, 1);
//! ```

pub mod handle;
pub mod local;
pub mod record;
pub mod store;

pub use handle::StoreHandle;
pub use local::LocalNotifier;
pub use record::{NotificationId, NotificationKind, NotificationRecord, Origin, WireNotification};
pub use store::{NotificationSnapshot, NotificationStore, ReadAcknowledger, StoreError};
