//! Coordinator and mode-selector behaviour over in-memory stores.
//!
//! Failure scenarios use [`common::ChaosStore`] to inject write failures,
//! lost writes and outages without any external services.
//!
//! Run with: `cargo test --test persistence`

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{list_with_entries, seed, ChaosStore};
use list_sync::{
    ActiveMode, AuthTransition, Backend, Collection, Entry, FilterCache, FilterSpec, InMemoryStore, ModeSelector,
    PersistenceCoordinator, PersistenceError, SortDirection, SortField, StorageStrategy, Store,
};

fn selector(local: Arc<dyn Store>, cloud: Option<Arc<dyn Store>>, strategy: StorageStrategy) -> ModeSelector {
    ModeSelector::new(
        PersistenceCoordinator::new(local, true),
        cloud.map(|c| PersistenceCoordinator::new(c, true)),
        strategy,
        Arc::new(FilterCache::default()),
    )
    .unwrap()
}

// =============================================================================
// Bulk rollback
// =============================================================================

#[tokio::test]
async fn bulk_save_rolls_back_when_third_entry_fails() {
    let store = Arc::new(ChaosStore::local());
    let coordinator = PersistenceCoordinator::new(store.clone(), true);

    let list = Collection::new("Groceries", "shopping");
    coordinator.save_collection(&list).await.unwrap();

    let e1 = Entry::new(&list.id, "Milk").with_id("e1");
    let e2 = Entry::new(&list.id, "Eggs").with_id("e2");
    let e3 = Entry::new(&list.id, "Bread").with_id("e3");
    store.fail_entry("e3");

    let err = coordinator.save_entries_bulk(&[e1, e2, e3]).await.unwrap_err();

    match err {
        PersistenceError::WriteFailed { id, backend, .. } => {
            assert_eq!(id, "e3");
            assert_eq!(backend, Backend::Local);
        }
        other => panic!("expected the original write failure, got {other:?}"),
    }
    assert_eq!(store.inner().entry_count(), 0, "e1 and e2 must be rolled back");
    assert!(store.inner().get_entry("e1").await.unwrap().is_none());
}

#[tokio::test]
async fn bulk_save_success_keeps_all_entries() {
    let store = Arc::new(InMemoryStore::local());
    let coordinator = PersistenceCoordinator::new(store.clone(), true);
    let list = list_with_entries("Work", "tasks", 5);

    coordinator.save_collection(&list).await.unwrap();
    coordinator.save_entries_bulk(&list.entries).await.unwrap();

    let loaded = coordinator.get_collection(&list.id).await.unwrap().unwrap();
    assert_eq!(loaded.entries.len(), 5);
    assert_eq!(
        loaded.entries.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
        list.entry_ids
    );
}

#[tokio::test]
async fn bulk_save_rejects_invalid_entry_before_writing() {
    let store = Arc::new(ChaosStore::local());
    let coordinator = PersistenceCoordinator::new(store.clone(), true);
    let good = Entry::new("c1", "Milk");
    let mut bad = Entry::new("c1", "Eggs");
    bad.is_completed = true;

    let err = coordinator.save_entries_bulk(&[good, bad]).await.unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidData(_)));
    assert_eq!(store.writes(), 0);
}

// =============================================================================
// Abandoned calls
// =============================================================================

#[tokio::test(start_paused = true)]
async fn abandoned_bulk_save_still_completes() {
    let store = Arc::new(ChaosStore::local());
    store.set_write_delay(Duration::from_millis(50));
    let coordinator = PersistenceCoordinator::new(store.clone(), true);
    let entries: Vec<Entry> = (0..3).map(|i| Entry::new("c1", format!("item {i}")).with_id(format!("e{i}"))).collect();

    let abandoned = tokio::time::timeout(Duration::from_millis(120), coordinator.save_entries_bulk(&entries)).await;
    assert!(abandoned.is_err(), "call should still be in flight at the deadline");

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.inner().entry_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn abandoned_bulk_save_still_rolls_back() {
    let store = Arc::new(ChaosStore::local());
    store.set_write_delay(Duration::from_millis(50));
    store.fail_entry("e2");
    let coordinator = PersistenceCoordinator::new(store.clone(), true);
    let entries: Vec<Entry> = (0..3).map(|i| Entry::new("c1", format!("item {i}")).with_id(format!("e{i}"))).collect();

    // e0 and e1 land at 100ms, e2 fails at once, rollback deletes take until 200ms
    let abandoned = tokio::time::timeout(Duration::from_millis(120), coordinator.save_entries_bulk(&entries)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.inner().entry_count(), 0, "rollback must finish without the caller");
}

#[tokio::test(start_paused = true)]
async fn abandoned_hybrid_write_still_mirrors() {
    let local = Arc::new(InMemoryStore::local());
    let cloud = Arc::new(ChaosStore::cloud());
    let s = selector(local.clone(), Some(cloud.clone()), StorageStrategy::Hybrid);
    s.initialize(true).await.unwrap();
    cloud.set_write_delay(Duration::from_millis(50));

    let list = Collection::new("Groceries", "shopping");
    let abandoned = tokio::time::timeout(Duration::from_millis(10), s.save_collection(&list)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(cloud.inner().collection_count(), 1);
    assert_eq!(local.collection_count(), 1);
    assert_eq!(s.load_all().await.unwrap().len(), 1);
}

// =============================================================================
// Verification gate
// =============================================================================

#[tokio::test]
async fn lost_write_fails_verification() {
    let store = Arc::new(ChaosStore::cloud());
    store.set_lossy(true);
    let coordinator = PersistenceCoordinator::new(store.clone(), true);

    let list = Collection::new("Groceries", "shopping");
    let err = coordinator.save_collection(&list).await.unwrap_err();

    assert!(matches!(
        err,
        PersistenceError::VerificationFailed { backend: Backend::Cloud, kind: "collection", ref id } if id == &list.id
    ));
}

#[tokio::test]
async fn lost_write_passes_without_verification() {
    let store = Arc::new(ChaosStore::local());
    store.set_lossy(true);
    let coordinator = PersistenceCoordinator::new(store, false);

    coordinator.save_entry(&Entry::new("c1", "Milk")).await.unwrap();
}

#[tokio::test]
async fn lost_bulk_write_is_rolled_back() {
    let store = Arc::new(ChaosStore::local());
    store.set_lossy(true);
    let coordinator = PersistenceCoordinator::new(store, true);

    let entries = vec![Entry::new("c1", "Milk"), Entry::new("c1", "Eggs")];
    let err = coordinator.save_entries_bulk(&entries).await.unwrap_err();
    assert!(matches!(err, PersistenceError::VerificationFailed { kind: "entry", .. }));
}

// =============================================================================
// Mode resolution
// =============================================================================

#[tokio::test]
async fn mode_resolution_table() {
    let cases = [
        (StorageStrategy::Automatic, false, Backend::Local),
        (StorageStrategy::Automatic, true, Backend::Cloud),
        (StorageStrategy::ForceLocal, false, Backend::Local),
        (StorageStrategy::ForceLocal, true, Backend::Local),
        (StorageStrategy::ForceCloud, false, Backend::Cloud),
        (StorageStrategy::ForceCloud, true, Backend::Cloud),
        (StorageStrategy::Hybrid, false, Backend::Local),
        (StorageStrategy::Hybrid, true, Backend::Cloud),
    ];

    for (strategy, authenticated, expected) in cases {
        let s = selector(
            Arc::new(InMemoryStore::local()),
            Some(Arc::new(InMemoryStore::cloud())),
            strategy,
        );
        s.initialize(authenticated).await.unwrap();
        assert_eq!(
            s.serving_backend(),
            Some(expected),
            "{strategy} with authenticated={authenticated}"
        );
        assert_eq!(s.current_mode(), ActiveMode::for_backend(expected));
    }
}

#[tokio::test]
async fn calls_before_initialize_are_rejected() {
    let s = selector(Arc::new(InMemoryStore::local()), None, StorageStrategy::Automatic);
    assert_eq!(s.current_mode(), ActiveMode::Uninitialized);
    assert!(matches!(s.load_all().await, Err(PersistenceError::Configuration(_))));
}

#[tokio::test]
async fn sign_out_switches_back_without_migrating() {
    let local = Arc::new(InMemoryStore::local());
    let cloud = Arc::new(InMemoryStore::cloud());
    let s = selector(local.clone(), Some(cloud.clone()), StorageStrategy::Automatic);
    s.initialize(true).await.unwrap();

    s.save_collection(&Collection::new("Cloud only", "tasks")).await.unwrap();
    let report = s
        .handle_auth_transition(AuthTransition { previous: true, current: false })
        .await
        .unwrap();

    assert!(report.is_none());
    assert_eq!(s.current_mode(), ActiveMode::LocalOnly);
    assert_eq!(cloud.collection_count(), 1);
    assert_eq!(local.collection_count(), 0);
}

#[tokio::test]
async fn cloud_outage_is_surfaced_not_masked() {
    let local = Arc::new(InMemoryStore::local());
    let cloud = Arc::new(ChaosStore::cloud());
    let s = selector(local.clone(), Some(cloud.clone()), StorageStrategy::ForceCloud);
    s.initialize(false).await.unwrap();

    cloud.set_unavailable(true);
    let err = s.load_all().await.unwrap_err();
    assert!(matches!(err, PersistenceError::BackendUnavailable { backend: Backend::Cloud, .. }));
    assert!(!s.availability(Backend::Cloud).is_available());

    let err = s.save_collection(&Collection::new("Work", "tasks")).await.unwrap_err();
    assert!(matches!(err, PersistenceError::WriteFailed { backend: Backend::Cloud, .. }));
    assert_eq!(local.collection_count(), 0, "no fallback to local");

    cloud.set_unavailable(false);
    s.load_all().await.unwrap();
    assert!(s.availability(Backend::Cloud).is_available());
}

// =============================================================================
// Hybrid mirroring
// =============================================================================

#[tokio::test]
async fn hybrid_writes_go_to_cloud_and_mirror_locally() {
    let local = Arc::new(InMemoryStore::local());
    let cloud = Arc::new(InMemoryStore::cloud());
    let s = selector(local.clone(), Some(cloud.clone()), StorageStrategy::Hybrid);
    s.initialize(true).await.unwrap();

    let list = list_with_entries("Groceries", "shopping", 2);
    s.save_collection(&list).await.unwrap();
    s.save_entries_bulk(&list.entries).await.unwrap();

    assert_eq!(cloud.entry_count(), 2);
    assert_eq!(local.entry_count(), 2);

    s.delete_collection(&list.id).await.unwrap();
    assert!(cloud.is_empty());
    assert!(local.is_empty());
}

#[tokio::test]
async fn hybrid_mirror_failure_does_not_fail_the_write() {
    let local = Arc::new(ChaosStore::local());
    let cloud = Arc::new(InMemoryStore::cloud());
    let s = selector(local.clone(), Some(cloud.clone()), StorageStrategy::Hybrid);
    s.initialize(true).await.unwrap();

    local.set_unavailable(true);
    s.save_collection(&Collection::new("Work", "tasks")).await.unwrap();
    assert_eq!(cloud.collection_count(), 1);
    assert_eq!(local.inner().collection_count(), 0);
}

// =============================================================================
// Filtered views and the cache
// =============================================================================

#[tokio::test]
async fn repeated_filter_does_no_backend_reads() {
    let store = Arc::new(ChaosStore::local());
    seed(store.as_ref(), &list_with_entries("Groceries", "shopping", 3)).await;
    seed(store.as_ref(), &list_with_entries("Work", "tasks", 2)).await;

    let s = selector(store.clone(), None, StorageStrategy::ForceLocal);
    s.initialize(false).await.unwrap();

    let spec = FilterSpec::default().of_type("shopping");
    let first = s.filtered(&spec).await.unwrap();
    let reads_after_first = store.reads();
    assert!(reads_after_first > 0);

    let second = s.filtered(&spec).await.unwrap();
    assert_eq!(store.reads(), reads_after_first, "second call must be served from memory");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(s.cache_stats().hits, 1);
    assert_eq!(s.cache_stats().misses, 1);
}

#[tokio::test]
async fn write_invalidates_the_filtered_view() {
    let store = Arc::new(ChaosStore::local());
    let s = selector(store.clone(), None, StorageStrategy::ForceLocal);
    s.initialize(false).await.unwrap();

    let spec = FilterSpec::default().sorted_by(SortField::Name, SortDirection::Ascending);
    s.save_collection(&Collection::new("Work", "tasks")).await.unwrap();
    assert_eq!(s.filtered(&spec).await.unwrap().len(), 1);

    s.save_collection(&Collection::new("Groceries", "shopping")).await.unwrap();
    let view = s.filtered(&spec).await.unwrap();
    let names: Vec<_> = view.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Groceries", "Work"]);
}

#[tokio::test]
async fn completed_filter_scenario() {
    let store = Arc::new(InMemoryStore::local());
    let groceries = Collection::new("Groceries", "shopping");
    let groceries = groceries.clone().with_entries(vec![Entry::new(&groceries.id, "Milk")]);
    let work = Collection::new("Work", "tasks");
    let work = work.clone().with_entries(vec![Entry::new(&work.id, "Report").completed()]);
    seed(store.as_ref(), &groceries).await;
    seed(store.as_ref(), &work).await;

    let s = selector(store, None, StorageStrategy::Automatic);
    s.initialize(false).await.unwrap();

    let done = s.filtered(&FilterSpec::default().completion(true, false)).await.unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].name, "Work");

    let open = s.filtered(&FilterSpec::default().completion(false, true)).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].name, "Groceries");
}

#[tokio::test]
async fn rename_with_unchanged_timestamp_refreshes_the_view() {
    let store = Arc::new(InMemoryStore::local());
    let s = selector(store, None, StorageStrategy::ForceLocal);
    s.initialize(false).await.unwrap();

    let mut list = Collection::new("Work", "tasks");
    s.save_collection(&list).await.unwrap();
    let spec = FilterSpec::default().search("home");
    assert!(s.filtered(&spec).await.unwrap().is_empty());

    // same updated_at: the update is accepted and only the name differs
    list.name = "Home".into();
    s.update_collection(&list).await.unwrap();

    let view = s.filtered(&spec).await.unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].name, "Home");
}

#[tokio::test(start_paused = true)]
async fn filtered_view_picks_up_other_writers_after_ttl() {
    let cloud = Arc::new(ChaosStore::cloud());
    let s = ModeSelector::new(
        PersistenceCoordinator::new(Arc::new(InMemoryStore::local()), true),
        Some(PersistenceCoordinator::new(cloud.clone(), true)),
        StorageStrategy::ForceCloud,
        Arc::new(FilterCache::new(Duration::from_secs(300), 10)),
    )
    .unwrap();
    s.initialize(true).await.unwrap();
    s.save_collection(&Collection::new("Work", "tasks")).await.unwrap();
    assert_eq!(s.filtered(&FilterSpec::default()).await.unwrap().len(), 1);

    // another device writes straight to the cloud store
    seed(cloud.as_ref(), &list_with_entries("Groceries", "shopping", 1)).await;
    let reads = cloud.reads();
    assert_eq!(s.filtered(&FilterSpec::default()).await.unwrap().len(), 1);
    assert_eq!(cloud.reads(), reads, "within the TTL the snapshot is reused");

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(s.filtered(&FilterSpec::default()).await.unwrap().len(), 2);
}
