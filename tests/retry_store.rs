//! Retry store behavior across handles and restarts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use smsdispatch::retry::{PersistError, RetryStore};
use tempfile::TempDir;

#[tokio::test]
async fn test_concurrent_enqueues_get_distinct_records() {
    let dir = TempDir::new().unwrap();
    let store = RetryStore::open(dir.path().join("endpoint_0")).unwrap();

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.enqueue(&format!("payload {i}")).await
        }));
    }

    let mut paths = HashSet::new();
    for handle in handles {
        assert!(paths.insert(handle.await.unwrap().unwrap()));
    }
    assert_eq!(paths.len(), 32);
    assert_eq!(store.len().await.unwrap(), 32);

    // No temp files survive a completed enqueue.
    let hidden = std::fs::read_dir(store.dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(hidden, 0);
}

#[tokio::test]
async fn test_records_survive_reopen_and_drain_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("endpoint_1");

    {
        let store = RetryStore::open(&path).unwrap();
        for payload in ["first", "second", "third"] {
            store.enqueue(payload).await.unwrap();
        }
    }

    let reopened = RetryStore::open(&path).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let report = reopened
        .drain_once(|payload| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(payload);
                Ok::<_, PersistError>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(report.delivered, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    assert!(reopened.is_empty().await.unwrap());
}

#[test]
fn test_open_over_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("taken");
    std::fs::write(&path, "x").unwrap();

    assert!(matches!(
        RetryStore::open(&path),
        Err(PersistError::NotADirectory(_))
    ));
}
