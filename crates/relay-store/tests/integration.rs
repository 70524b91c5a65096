//! Integration tests for the relay-store crate.
//!
//! Exercises migrations and the full memory store lifecycle against an
//! on-disk SQLite database (via tempfile).

use relay_store::{CacheLayer, Database, MemoryStore};

#[tokio::test]
async fn database_open_and_migrate_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let db = Database::open_and_migrate(db_path.clone()).await.unwrap();

    let count: i64 = db
        .execute(|conn| {
            let c: i64 = conn.query_row("SELECT count(*) FROM task_results", [], |row| row.get(0))?;
            Ok(c)
        })
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(db_path.exists());
}

#[tokio::test]
async fn database_open_and_migrate_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_idempotent.db");

    let db1 = Database::open_and_migrate(db_path.clone()).await.unwrap();
    drop(db1);

    let db2 = Database::open_and_migrate(db_path).await.unwrap();
    let count: i64 = db2
        .execute(|conn| {
            let c: i64 = conn.query_row("SELECT count(*) FROM learning_patterns", [], |row| row.get(0))?;
            Ok(c)
        })
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn memory_store_full_lifecycle_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(dir.path().join("memory.db")).await.unwrap();

    store
        .record_result(
            "task_abc",
            "meeting-prep",
            "success",
            Some(serde_json::json!({"agenda": "q3 roadmap"})),
            None,
            Some(2.3),
            None,
        )
        .await
        .unwrap();

    let history = store.task_history(Some("meeting-prep".to_string()), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "success");

    store
        .put_preference("meeting_length", "meeting-prep", serde_json::json!(30), 0.7)
        .await
        .unwrap();
    let prefs = store.get_preferences(Some("meeting-prep".to_string())).await.unwrap();
    assert_eq!(prefs.len(), 1);

    let context_id = store
        .put_context("meeting-prep", "last_agenda", serde_json::json!({"topic": "roadmap"}), 24)
        .await
        .unwrap();
    assert!(context_id > 0);

    let context = store.get_context("meeting-prep", None).await.unwrap();
    assert_eq!(context.len(), 1);

    store
        .record_interaction("meeting-prep", "scheduler", "need a slot tomorrow", Some("10am works".into()))
        .await
        .unwrap();

    let insights = store.collaboration_insights("meeting-prep").await.unwrap();
    assert_eq!(insights.messages_sent, 1);
    assert_eq!(insights.total_tasks, 1);
    assert!((insights.task_success_rate - 1.0).abs() < 1e-9);

    store.save_all().await.unwrap();
}

#[tokio::test]
async fn cache_layer_basic_operations() {
    let cache: CacheLayer<String> = CacheLayer::builder("test-cache")
        .max_capacity(100)
        .ttl_seconds(60)
        .build();

    cache.insert("key1", &"value1".to_string()).await.unwrap();
    let val = cache.get("key1").await;
    assert_eq!(val.as_deref(), Some("value1"));

    assert_eq!(cache.stats().hits(), 1);
    assert_eq!(cache.stats().misses(), 0);

    let missing = cache.get("nonexistent").await;
    assert!(missing.is_none());
    assert_eq!(cache.stats().misses(), 1);

    cache.invalidate("key1").await;
    assert!(cache.get("key1").await.is_none());
}
