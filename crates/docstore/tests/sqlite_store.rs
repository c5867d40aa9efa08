//! SQLite backend tests against an on-disk database.

use std::sync::Arc;

use docstore::{
    ChangeKind, CollectionPath, DocumentPath, DocumentStore, Fields, Precondition, Query,
    SqliteStore, Updates, WriteBatch,
};
use serde_json::{Value, json};
use tempfile::TempDir;

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

fn path(p: &str) -> DocumentPath {
    DocumentPath::parse(p).unwrap()
}

async fn open_store(dir: &TempDir) -> SqliteStore {
    let db_path = dir.path().join("docs.db");
    let url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );
    SqliteStore::connect(&url).await.unwrap()
}

#[tokio::test]
async fn set_get_and_list() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store
        .set(&path("organizations/o1"), fields(json!({ "name": "Acme" })), false)
        .await
        .unwrap();
    store
        .set(&path("organizations/o2"), fields(json!({ "name": "Beta" })), false)
        .await
        .unwrap();

    let doc = store.get(&path("organizations/o1")).await.unwrap().unwrap();
    assert_eq!(doc.get_str("name"), Some("Acme"));

    let all = store
        .list(&CollectionPath::root("organizations"))
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn merge_keeps_existing_fields_and_create_time() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let p = path("admins/a1");

    store
        .set(&p, fields(json!({ "displayName": "Ada", "fcmTokens": [] })), false)
        .await
        .unwrap();
    let first = store.get(&p).await.unwrap().unwrap();

    store
        .set(&p, fields(json!({ "email": "ada@example.com" })), true)
        .await
        .unwrap();
    let merged = store.get(&p).await.unwrap().unwrap();

    assert_eq!(merged.get_str("displayName"), Some("Ada"));
    assert_eq!(merged.get_str("email"), Some("ada@example.com"));
    assert_eq!(merged.create_time, first.create_time);
}

#[tokio::test]
async fn concurrent_union_and_remove_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir).await);
    let p = path("admins/a1");

    store
        .set(&p, fields(json!({ "fcmTokens": ["dead"] })), false)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            store
                .update(&p, Updates::new().array_union("fcmTokens", [format!("t{i}")]))
                .await
        }));
    }
    {
        let store = store.clone();
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            store
                .update(&p, Updates::new().array_remove("fcmTokens", ["dead"]))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let doc = store.get(&p).await.unwrap().unwrap();
    let tokens = doc.get("fcmTokens").and_then(Value::as_array).unwrap();
    assert_eq!(tokens.len(), 16);
    assert!(!tokens.contains(&json!("dead")));
}

#[tokio::test]
async fn batch_is_atomic_and_publishes_changes() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let mut rx = store.subscribe();

    let v1 = path("organizations/o1/violations/v1");
    store
        .set(&v1, fields(json!({ "status": "pending_acknowledgement" })), false)
        .await
        .unwrap();
    let created = rx.recv().await.unwrap();
    assert_eq!(created.kind(), ChangeKind::Created);

    let mut failing = WriteBatch::new();
    failing.update(v1.clone(), Updates::new().set("status", "escalated_to_manager"));
    failing.update(
        path("organizations/o1/violations/missing"),
        Updates::new().set("status", "x"),
    );
    assert!(store.commit(failing).await.is_err());
    let doc = store.get(&v1).await.unwrap().unwrap();
    assert_eq!(doc.get_str("status"), Some("pending_acknowledgement"));

    let mut batch = WriteBatch::new();
    batch.update(
        v1.clone(),
        Updates::new()
            .set("status", "escalated_to_manager")
            .server_timestamp("escalatedAt"),
    );
    batch.create(
        path("organizations/o1/users/r1/notifications/n1"),
        fields(json!({ "title": "Escalated", "status": "pending" })),
    );
    store.commit(batch).await.unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.path, v1);
    assert_eq!(first.kind(), ChangeKind::Updated);
    assert_eq!(second.kind(), ChangeKind::Created);
}

#[tokio::test]
async fn query_and_conditional_update() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let violations = CollectionPath::parse("organizations/o1/violations").unwrap();

    store
        .set(
            &violations.doc("old").unwrap(),
            fields(json!({ "status": "reported", "createdAt": "2024-01-01T09:00:00.000Z" })),
            false,
        )
        .await
        .unwrap();
    store
        .set(
            &violations.doc("new").unwrap(),
            fields(json!({ "status": "reported", "createdAt": "2024-01-01T11:00:00.000Z" })),
            false,
        )
        .await
        .unwrap();

    let stale = store
        .query(
            &Query::new(violations.clone())
                .where_eq("status", "reported")
                .where_lt("createdAt", "2024-01-01T10:00:00.000Z"),
        )
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id(), "old");

    let claimed = store
        .update_if(
            &violations.doc("old").unwrap(),
            Precondition::field_equals("status", "resolved"),
            Updates::new().set("status", "x"),
        )
        .await
        .unwrap();
    assert!(!claimed);
}
