//! Integration tests against a real Redis (the cloud store).
//!
//! Tests use testcontainers - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Requires Docker
//! cargo test --test redis_integration -- --ignored
//! ```

mod common;

use std::sync::Arc;

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};
use tokio::sync::watch;

use common::{list_with_entries, seed};
use list_sync::{
    ActiveMode, Collection, Entry, InMemoryStore, PersistenceConfig, PersistenceContext, RedisStore, StorageError,
    StorageStrategy, Store,
};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_url(container: &Container<'_, GenericImage>) -> String {
    format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379))
}

// =============================================================================
// Store contract
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_store_crud_round_trip() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = RedisStore::new(&redis_url(&redis), "test:").await.unwrap();
    store.ping().await.unwrap();

    let list = list_with_entries("Groceries", "shopping", 3);
    seed(&store, &list).await;

    let collections = store.get_all_collections().await.unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].entry_ids, list.entry_ids);
    assert!(collections[0].entries.is_empty(), "headers only");

    let entries = store.get_entries_by_collection(&list.id).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(store.get_all_entries().await.unwrap().len(), 3);

    store.delete_entry(&list.entries[0].id).await.unwrap();
    assert_eq!(store.get_entries_by_collection(&list.id).await.unwrap().len(), 2);
    assert!(store.get_entry(&list.entries[0].id).await.unwrap().is_none());

    store.delete_collection(&list.id).await.unwrap();
    assert!(store.get_collection(&list.id).await.unwrap().is_none());
    assert!(store.get_all_collections().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_update_of_missing_record_is_not_found() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = RedisStore::new(&redis_url(&redis), "test:").await.unwrap();

    let err = store.update_entry(&Entry::new("c1", "Milk")).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));

    let err = store.update_collection(&Collection::new("Work", "tasks")).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
    assert!(store.get_all_collections().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_entry_saved_under_new_owner_leaves_old_index() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = RedisStore::new(&redis_url(&redis), "test:").await.unwrap();

    let entry = Entry::new("c1", "Milk").with_id("e1");
    store.save_entry(&entry).await.unwrap();

    let mut moved = entry.clone();
    moved.collection_id = "c2".into();
    store.save_entry(&moved).await.unwrap();

    assert!(store.get_entries_by_collection("c1").await.unwrap().is_empty());
    let owned = store.get_entries_by_collection("c2").await.unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].collection_id, "c2");
    assert_eq!(store.get_all_entries().await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_prefixes_isolate_users() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let alice = RedisStore::new(&url, "user:alice:").await.unwrap();
    let bob = RedisStore::new(&url, "user:bob:").await.unwrap();

    seed(&alice, &list_with_entries("Groceries", "shopping", 2)).await;

    assert_eq!(alice.get_all_collections().await.unwrap().len(), 1);
    assert!(bob.get_all_collections().await.unwrap().is_empty());
    assert!(bob.get_all_entries().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_unreachable_reports_unavailable() {
    let err = RedisStore::new("redis://127.0.0.1:1", "test:").await.err().unwrap();
    assert!(matches!(err, StorageError::Unavailable(_)));
}

// =============================================================================
// End-to-end sign-in
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn sign_in_migrates_local_lists_to_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let cloud = Arc::new(RedisStore::new(&redis_url(&redis), "e2e:").await.unwrap());
    let local = Arc::new(InMemoryStore::local());
    seed(local.as_ref(), &list_with_entries("Groceries", "shopping", 2)).await;
    seed(local.as_ref(), &list_with_entries("Work", "tasks", 1)).await;

    let config = PersistenceConfig {
        strategy: StorageStrategy::Hybrid,
        redis_url: Some(redis_url(&redis)),
        ..Default::default()
    };
    let (auth_tx, auth_rx) = watch::channel(false);
    let context = PersistenceContext::with_stores(local.clone(), Some(cloud.clone()), &config, auth_rx)
        .await
        .unwrap();

    let mut mode = context.selector().mode_receiver();
    auth_tx.send(true).unwrap();
    mode.wait_for(|m| *m == ActiveMode::CloudActive).await.unwrap();

    assert_eq!(cloud.get_all_collections().await.unwrap().len(), 2);
    assert_eq!(cloud.get_all_entries().await.unwrap().len(), 3);
    assert_eq!(local.entry_count(), 3, "hybrid keeps the local mirror");

    let loaded = context.selector().load_all().await.unwrap();
    assert_eq!(loaded.iter().map(|c| c.entries.len()).sum::<usize>(), 3);
    context.teardown().await;
}
