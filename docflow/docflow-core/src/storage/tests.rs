use super::*;
use crate::activity::{ActivityAction, ActivityRecord};
use crate::catalog::{Category, Content, Document};
use crate::error::Error;
use chrono::Utc;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

fn sample(title: &str) -> Document {
    let now = Utc::now();
    Document {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: None,
        content: Content::Text("body".into()),
        category: Category::Business,
        read_time: 5,
        created_at: now,
        last_modified: now,
        created_by: "u1".into(),
        is_active: true,
        version: 1,
    }
}

#[tokio::test]
async fn transaction_persists_and_reloads() {
    let tempdir = tempfile::tempdir().unwrap();
    let doc = sample("persisted");
    let id = doc.id;
    {
        let store = Store::open(tempdir.path()).await.unwrap();
        store
            .transaction(|t| {
                t.documents.insert(id, doc);
                Ok(())
            })
            .await
            .unwrap();
    }
    let store = Store::open(tempdir.path()).await.unwrap();
    let title = store
        .read(|t| t.documents.get(&id).map(|d| d.title.clone()))
        .await;
    assert_eq!(title.as_deref(), Some("persisted"));
}

#[tokio::test]
async fn failed_transaction_leaves_tables_untouched() {
    let store = Store::in_memory();
    let doc = sample("rolled back");
    let id = doc.id;
    let res: Result<()> = store
        .transaction(|t| {
            t.documents.insert(id, doc);
            Err(Error::Conflict("abort".into()))
        })
        .await;
    assert!(res.is_err());
    assert!(store.read(|t| t.documents.is_empty()).await);
}

#[tokio::test]
async fn labels_full_replace() {
    let store = Store::in_memory();
    let doc = Uuid::new_v4();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    store
        .transaction(|t| {
            t.set_labels(doc, &[a, b]);
            t.set_labels(doc, &[c]);
            Ok(())
        })
        .await
        .unwrap();
    let pairs = store.read(|t| t.document_labels.clone()).await;
    assert_eq!(pairs.len(), 1);
    assert!(pairs.contains(&(doc, c)));
}

#[tokio::test]
async fn retry_once_recovers_from_transient_failure() {
    let calls = AtomicUsize::new(0);
    let out = retry_once(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Err(io::Error::new(io::ErrorKind::Interrupted, "blip"))
            } else {
                Ok(42)
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(out, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_once_does_not_retry_persistent_failure() {
    let calls = AtomicUsize::new(0);
    let res: io::Result<()> = retry_once(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(io::Error::new(io::ErrorKind::PermissionDenied, "nope")) }
    })
    .await;
    assert!(res.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn activity_appends_leave_table_file_alone() {
    let tempdir = tempfile::tempdir().unwrap();
    let doc = sample("viewed");
    let id = doc.id;
    let store = Store::open(tempdir.path()).await.unwrap();
    store
        .transaction(|t| {
            t.documents.insert(id, doc);
            Ok(())
        })
        .await
        .unwrap();
    let table_file = tempdir.path().join(TABLE_FILE);
    let before = std::fs::read(&table_file).unwrap();

    for _ in 0..3 {
        store
            .append_activity(ActivityRecord::new("c1", id, ActivityAction::View, Some(10)))
            .await
            .unwrap();
    }

    assert_eq!(std::fs::read(&table_file).unwrap(), before);
    let log = std::fs::read_to_string(tempdir.path().join(ACTIVITY_FILE)).unwrap();
    assert_eq!(log.lines().count(), 3);
    assert_eq!(store.read_activity(|log| log.len()).await, 3);
}

#[tokio::test]
async fn activity_log_reloads_and_skips_torn_line() {
    let tempdir = tempfile::tempdir().unwrap();
    let id = Uuid::new_v4();
    {
        let store = Store::open(tempdir.path()).await.unwrap();
        store
            .append_activity(ActivityRecord::new("c1", id, ActivityAction::Favorite, None))
            .await
            .unwrap();
    }
    let path = tempdir.path().join(ACTIVITY_FILE);
    let mut text = std::fs::read_to_string(&path).unwrap();
    text.push_str("{\"id\":\"trunc");
    std::fs::write(&path, text).unwrap();

    {
        let store = Store::open(tempdir.path()).await.unwrap();
        store
            .append_activity(ActivityRecord::new("c1", id, ActivityAction::Share, None))
            .await
            .unwrap();
    }

    let store = Store::open(tempdir.path()).await.unwrap();
    let actions = store
        .read_activity(|log| log.iter().map(|r| r.action).collect::<Vec<_>>())
        .await;
    assert_eq!(actions, vec![ActivityAction::Favorite, ActivityAction::Share]);
}
