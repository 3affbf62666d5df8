//! Property Notify - 物业管理客户端的实时通知与会话存活层
//!
//! 拉取通知列表、合并本地通知、维护未读计数、接收推送，
//! 并定期确认会话仍然有效。

pub mod backend;
pub mod center;
pub mod config;
pub mod feed;
pub mod notification;
pub mod push;
pub mod session;

pub use backend::{BackendError, HttpBackend, NotificationBackend, SpawnedAcknowledger};
pub use center::{CenterError, NotificationCenter, StartReport};
pub use config::ClientConfig;
pub use feed::{FeedError, FeedFetcher};
pub use notification::{
    LocalNotifier, NotificationId, NotificationKind, NotificationRecord, NotificationSnapshot,
    NotificationStore, Origin, ReadAcknowledger, StoreError, StoreHandle,
};
pub use push::{ChannelEvent, ChannelState, PushChannel, PushError, ReconnectPolicy};
pub use session::{SessionEndReason, SessionMonitor, SessionState};
