use chrono::{DateTime, Duration, TimeZone, Utc};
use property_notify::{
    LocalNotifier, NotificationId, NotificationKind, NotificationRecord, NotificationStore, Origin,
    StoreHandle,
};
use std::collections::BTreeSet;

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn record(id: i64, is_read: bool, minutes: i64) -> NotificationRecord {
    NotificationRecord::persisted(
        id,
        format!("n{}", id),
        "body",
        NotificationKind::Info,
        is_read,
        at(minutes),
    )
}

fn assert_invariant(store: &NotificationStore) {
    let snapshot = store.snapshot();
    let unread = snapshot.records.iter().filter(|r| !r.is_read).count();
    assert_eq!(snapshot.unread_count, unread);
    assert_eq!(store.unread_count(), unread);
}

fn ids(store: &NotificationStore) -> BTreeSet<NotificationId> {
    store.snapshot().records.iter().map(|r| r.id).collect()
}

#[test]
fn test_fetch_push_duplicate_mark_read_sequence() {
    let mut store = NotificationStore::new();

    // 1. 首页：一条未读一条已读
    store.ingest_fetched_page(vec![record(1, false, 0), record(2, true, 1)]);
    assert_eq!(store.unread_count(), 1);
    assert_eq!(store.len(), 2);

    // 2. 推送新记录，排在最前
    assert!(store.ingest_pushed(record(3, false, 10)));
    assert_eq!(store.len(), 3);
    assert_eq!(store.unread_count(), 2);
    assert_eq!(store.snapshot().records[0].id, NotificationId::Server(3));

    // 3. 重复投递
    assert!(!store.ingest_pushed(record(3, false, 10)));
    assert_eq!(store.len(), 3);
    assert_eq!(store.unread_count(), 2);

    // 4. 标记已读两次
    assert_eq!(store.mark_read(NotificationId::Server(1)), Ok(true));
    assert_eq!(store.unread_count(), 1);
    assert_eq!(store.mark_read(NotificationId::Server(1)), Ok(false));
    assert_eq!(store.unread_count(), 1);

    assert_invariant(&store);
}

#[test]
fn test_local_record_survives_empty_refresh() {
    let mut store = NotificationStore::new();

    let id = store
        .ingest_local("x", "y", NotificationKind::from("info"))
        .unwrap();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.records[0].origin, Origin::Local);
    assert_eq!(snapshot.unread_count, 1);

    store.ingest_fetched_page(Vec::new());
    assert!(store.contains(id));
    assert_eq!(store.unread_count(), 1);
}

#[test]
fn test_local_record_survives_non_empty_refresh() {
    let mut store = NotificationStore::new();
    let id = store
        .ingest_local("Payment saved", "Receipt issued", NotificationKind::Success)
        .unwrap();

    store.ingest_fetched_page(vec![record(1, false, 0), record(2, false, 5)]);
    store.ingest_fetched_page(vec![record(2, false, 5)]);

    assert!(store.contains(id));
    assert!(store.get(id).unwrap().is_local());
    assert_invariant(&store);
}

#[test]
fn test_push_idempotence() {
    let mut once = NotificationStore::new();
    once.ingest_fetched_page(vec![record(1, false, 0)]);
    once.ingest_pushed(record(7, false, 3));

    let mut twice = NotificationStore::new();
    twice.ingest_fetched_page(vec![record(1, false, 0)]);
    twice.ingest_pushed(record(7, false, 3));
    twice.ingest_pushed(record(7, false, 3));

    assert_eq!(once.snapshot(), twice.snapshot());
}

#[test]
fn test_fetch_and_push_commute() {
    let page = vec![record(1, false, 0), record(2, true, 2), record(3, false, 4)];
    let pushed = record(9, false, 3);

    let mut fetch_first = NotificationStore::new();
    fetch_first.ingest_fetched_page(page.clone());
    fetch_first.ingest_pushed(pushed.clone());

    let mut push_first = NotificationStore::new();
    push_first.ingest_pushed(pushed);
    push_first.ingest_fetched_page(page);

    assert_eq!(ids(&fetch_first), ids(&push_first));
    assert_eq!(fetch_first.snapshot(), push_first.snapshot());
}

#[test]
fn test_mark_read_is_monotonic() {
    let mut store = NotificationStore::new();
    store.ingest_fetched_page(vec![record(1, true, 0), record(2, false, 1)]);

    let before = store.unread_count();
    assert_eq!(store.mark_read(NotificationId::Server(1)), Ok(false));
    assert_eq!(store.unread_count(), before);

    // 重新拉取旧的未读状态不会把记录变回未读
    store.mark_read(NotificationId::Server(2)).unwrap();
    store.ingest_fetched_page(vec![record(2, false, 1)]);
    assert!(store.get(NotificationId::Server(2)).unwrap().is_read);
    assert_eq!(store.unread_count(), 0);
}

#[test]
fn test_order_is_newest_first_across_origins() {
    let mut store = NotificationStore::new();
    store.ingest_fetched_page(vec![record(1, false, 0), record(2, false, 20)]);
    store.ingest_pushed(record(3, false, 10));

    let order: Vec<NotificationId> = store.snapshot().records.iter().map(|r| r.id).collect();
    assert_eq!(
        order,
        vec![
            NotificationId::Server(2),
            NotificationId::Server(3),
            NotificationId::Server(1)
        ]
    );

    // 本地记录使用当前时间，排在历史记录之前
    let local = store.ingest_local("Saved", "ok", NotificationKind::Info).unwrap();
    assert_eq!(store.snapshot().records[0].id, local);
}

#[test]
fn test_invariant_holds_at_every_step() {
    let mut store = NotificationStore::new();
    let mut local_ids = Vec::new();

    for step in 0..30i64 {
        match step % 5 {
            0 => {
                store.ingest_fetched_page(vec![
                    record(step, step % 2 == 0, step),
                    record(step + 1, false, step + 1),
                ]);
            }
            1 => {
                store.ingest_pushed(record(100 + step, false, step));
            }
            2 => {
                if let Some(id) = store.ingest_local("local", "m", NotificationKind::Warning) {
                    local_ids.push(id);
                }
            }
            3 => {
                store.mark_read(NotificationId::Server(step - 3)).unwrap();
            }
            _ => {
                if let Some(id) = local_ids.first() {
                    store.mark_read(*id).unwrap();
                }
            }
        }
        assert_invariant(&store);
    }

    for id in local_ids {
        assert!(store.contains(id));
    }
}

#[tokio::test]
async fn test_handle_broadcasts_changes_and_teardown() {
    let handle = StoreHandle::default();
    let mut rx = handle.subscribe();
    let notifier = LocalNotifier::new(handle.clone());

    handle.update(|store| store.ingest_fetched_page(vec![record(1, false, 0)]));
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().unread_count, 1);

    notifier.success("Saved", "Work order updated").unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().len(), 2);

    handle.update(|store| store.tear_down());
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_empty());

    // 销毁后的输入被忽略，不产生新的快照
    assert!(notifier.info("late", "ignored").is_none());
    assert!(!handle.update(|store| store.ingest_pushed(record(2, false, 1))));
    assert!(!rx.has_changed().unwrap());
}
