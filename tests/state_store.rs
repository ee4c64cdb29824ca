// ABOUTME: Integration tests for the persisted state documents.
// ABOUTME: Covers merge semantics, concurrent merges, corrupt files, and version commits.

mod support;

use devpush::state::{CONFIG_FILE, Document, StateError, StateStore};
use devpush::version::Version;
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;
use support::TestInstall;

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

#[tokio::test]
async fn merge_keeps_keys_not_in_patch() {
    let install = TestInstall::new("1.0.0");
    let store = install.store();
    let path = store.path(CONFIG_FILE);
    fs::write(&path, r#"{"domain": "example.com", "custom": {"nested": true}}"#).unwrap();

    let merged = store
        .merge(&path, doc(json!({"domain": "devpush.io", "replicas": 2})))
        .await
        .unwrap();

    assert_eq!(merged["domain"], json!("devpush.io"));
    assert_eq!(merged["replicas"], json!(2));
    assert_eq!(merged["custom"], json!({"nested": true}));

    let reread = store.read(&path).await.unwrap();
    assert_eq!(reread, merged);
}

#[tokio::test]
async fn merge_creates_missing_document() {
    let install = TestInstall::new("1.0.0");
    let store = install.store();

    let config = store.merge_config(doc(json!({"a": 1}))).await.unwrap();
    assert_eq!(Value::Object(config), json!({"a": 1}));
    assert!(install.data_dir().join(CONFIG_FILE).exists());
}

#[tokio::test]
async fn concurrent_merges_of_different_keys_both_survive() {
    let install = TestInstall::new("1.0.0");
    let store = Arc::new(install.store());

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut patch = Document::new();
                patch.insert(format!("key{i}"), json!(i));
                store.merge_config(patch).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let config = store.config().await.unwrap();
    for i in 0..16 {
        assert_eq!(config[&format!("key{i}")], json!(i));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn merges_from_separate_stores_do_not_lose_keys() {
    let install = TestInstall::new("1.0.0");
    // Two stores share nothing in memory, like two devpush processes.
    let first = Arc::new(install.store());
    let second = Arc::new(install.store());

    for round in 0..50 {
        let a = Arc::clone(&first);
        let b = Arc::clone(&second);
        let left = tokio::spawn(async move {
            let mut patch = Document::new();
            patch.insert(format!("a{round}"), json!(round));
            a.merge_config(patch).await.unwrap();
        });
        let right = tokio::spawn(async move {
            let mut patch = Document::new();
            patch.insert(format!("b{round}"), json!(round));
            b.merge_config(patch).await.unwrap();
        });
        left.await.unwrap();
        right.await.unwrap();
    }

    let config = first.config().await.unwrap();
    let missing: Vec<String> = (0..50)
        .flat_map(|round| [format!("a{round}"), format!("b{round}")])
        .filter(|key| !config.contains_key(key))
        .collect();
    assert!(missing.is_empty(), "lost keys: {missing:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_partial_writes() {
    let install = TestInstall::new("1.0.0");
    let store = Arc::new(install.store());
    let path = store.path(CONFIG_FILE);
    let filler = "x".repeat(64 * 1024);
    store
        .merge(&path, doc(json!({"round": 0, "filler": filler.clone()})))
        .await
        .unwrap();

    let writer = {
        let store = Arc::clone(&store);
        let path = path.clone();
        tokio::spawn(async move {
            for round in 1..50 {
                store
                    .merge(&path, doc(json!({"round": round, "filler": filler.clone()})))
                    .await
                    .unwrap();
            }
        })
    };

    while !writer.is_finished() {
        // Complete documents only: a torn write would be Corrupt.
        let document = store.read(&path).await.unwrap();
        assert_eq!(document["filler"].as_str().map(str::len), Some(64 * 1024));
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    assert_eq!(store.read(&path).await.unwrap()["round"], json!(49));
}

#[tokio::test]
async fn missing_document_is_not_found_on_read() {
    let install = TestInstall::empty();
    let store = install.store();

    let err = store.installed_version().await.unwrap_err();
    assert!(matches!(err, StateError::NotFound(_)));
    assert!(store.read_optional(&store.path("other.json")).await.unwrap().is_none());
    assert!(store.config().await.unwrap().is_empty());
}

#[tokio::test]
async fn unparseable_document_is_corrupt_and_left_alone() {
    let install = TestInstall::empty();
    let store = install.store();
    let path = install.data_dir().join("version.json");
    fs::write(&path, "{not json").unwrap();

    let err = store.installed_version().await.unwrap_err();
    assert!(matches!(err, StateError::Corrupt { .. }), "got {err:?}");

    let err = store.merge(&path, doc(json!({"x": 1}))).await.unwrap_err();
    assert!(matches!(err, StateError::Corrupt { .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
}

#[tokio::test]
async fn non_object_document_is_corrupt() {
    let install = TestInstall::empty();
    let store = install.store();
    fs::write(install.data_dir().join("version.json"), "[1, 2]").unwrap();

    assert!(matches!(
        store.installed_version().await,
        Err(StateError::Corrupt { .. })
    ));
}

#[tokio::test]
async fn installed_version_is_normalized() {
    let install = TestInstall::new("v1.4.0-rc.2");
    assert_eq!(
        install.store().installed_version().await.unwrap(),
        Version::new(1, 4, 0)
    );
}

#[tokio::test]
async fn commit_version_normalizes_and_keeps_other_keys() {
    let install = TestInstall::empty();
    fs::write(
        install.data_dir().join("version.json"),
        r#"{"version": "1.0.0", "channel": "stable"}"#,
    )
    .unwrap();
    let store = install.store();

    store
        .commit_version(&Version::parse("1.1.0-beta.1").unwrap())
        .await
        .unwrap();

    assert_eq!(
        install.version_document(),
        json!({"version": "1.1.0", "channel": "stable"})
    );
}

#[tokio::test]
async fn commit_version_refuses_regression() {
    let install = TestInstall::new("2.0.0");
    let store = install.store();

    let err = store
        .commit_version(&Version::new(1, 9, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::Regression { .. }));
    assert_eq!(install.version_document(), json!({"version": "2.0.0"}));
}

#[tokio::test]
async fn documents_outside_system_dir_are_written_directly() {
    let install = TestInstall::empty();
    let store = StateStore::new(support::direct_gate(), install.data_dir());
    let outside = install.app_dir().join("nested").join("settings.json");

    store
        .merge_entry(&outside, "theme", &"dark")
        .await
        .unwrap();
    let theme: Option<String> = store.read_entry(&outside, "theme").await.unwrap();
    assert_eq!(theme.as_deref(), Some("dark"));
}
