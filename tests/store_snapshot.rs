// tests/store_snapshot.rs
mod common;

use common::rec;
use contest_notify_bot::ingest::types::Source;
use contest_notify_bot::store::{Snapshot, SnapshotStore, StoreError};

#[tokio::test]
async fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("nested/competition_data.json"));

    let mut a = rec(Source::Kaggle, "123", "Comp A").with_meta("reward", "$1,000");
    a.image_url = Some("https://img/a.png".into());
    let b = rec(Source::Dacon, "236000", "대회 B").with_meta("keywords", "NLP");
    let snap = Snapshot::new(vec![a, b]);

    store.save(&snap).await.expect("save");
    let loaded = store.load().await;
    assert_eq!(loaded, snap);

    // no temp file left behind
    let names: Vec<String> = std::fs::read_dir(dir.path().join("nested"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["competition_data.json".to_string()]);
}

#[tokio::test]
async fn file_is_a_plain_json_array() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("s.json"));
    store
        .save(&Snapshot::new(vec![rec(Source::Kaggle, "1", "A")]))
        .await
        .unwrap();
    let v: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    let arr = v.as_array().expect("array");
    assert_eq!(arr[0]["id"], "kaggle:1");
    assert_eq!(arr[0]["source"], "KAGGLE");
}

#[tokio::test]
async fn missing_file_is_first_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("absent.json"));
    assert!(store.read().await.unwrap().is_none());
    assert!(store.load().await.is_empty());
}

#[tokio::test]
async fn corrupt_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "[{\"id\": \"kaggle:1\", \"tit").unwrap();
    let store = SnapshotStore::new(&path);

    assert!(matches!(store.read().await, Err(StoreError::Corrupt { .. })));
    assert!(store.load().await.is_empty());
}

#[tokio::test]
async fn save_replaces_previous_content() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("s.json"));
    store
        .save(&Snapshot::new(vec![rec(Source::Kaggle, "1", "A")]))
        .await
        .unwrap();
    store
        .save(&Snapshot::new(vec![rec(Source::Dacon, "2", "B")]))
        .await
        .unwrap();
    let loaded = store.load().await;
    assert_eq!(loaded.len(), 1);
    assert!(loaded.contains("dacon:2"));
}

#[tokio::test]
async fn save_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("nested/s.json"));
    store
        .save(&Snapshot::new(vec![rec(Source::Kaggle, "1", "A")]))
        .await
        .unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path().join("nested"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["s.json".to_string()]);
}
