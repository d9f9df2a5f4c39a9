use std::sync::Arc;
use std::time::Duration;

use nfs4_client::dir_cache::{DirectoryCache, DirectoryCacheSnapshot, NameCacheEntry};

fn entry(name: &str, id: u64) -> NameCacheEntry {
    NameCacheEntry { name: name.to_string(), id }
}

fn snapshot(entries: &[(&str, u64)]) -> Arc<DirectoryCacheSnapshot> {
    Arc::new(DirectoryCacheSnapshot::new(entries.iter().map(|(n, id)| entry(n, *id)).collect()))
}

#[tokio::test]
async fn new_cache_is_trashed() {
    let cache = DirectoryCache::new(Duration::from_secs(5));
    assert!(cache.lock().await.is_none());

    let guard = cache.reset_and_lock().await;
    assert!(!guard.is_trashed());
    assert!(guard.snapshot().is_none());
}

#[tokio::test]
async fn installed_snapshot_fills_the_name_cache() {
    let cache = DirectoryCache::new(Duration::from_secs(5));
    let mut guard = cache.reset_and_lock().await;
    guard.install_snapshot(snapshot(&[("a", 2), ("b", 3)]), 10);
    drop(guard);

    let guard = cache.lock().await.expect("cache is valid");
    assert_eq!(guard.entry("a"), Some(2));
    assert_eq!(guard.entry("b"), Some(3));
    assert_eq!(guard.entry("c"), None);
    assert_eq!(guard.change_info(), 10);
    assert!(!guard.is_expired());
}

#[tokio::test]
async fn updates_do_not_touch_pinned_snapshots() {
    let cache = DirectoryCache::new(Duration::from_secs(5));
    let mut guard = cache.reset_and_lock().await;
    guard.install_snapshot(snapshot(&[("a", 2), ("b", 3)]), 1);
    let pinned = guard.snapshot().expect("snapshot installed");

    guard.add_entry("c", 4);
    guard.remove_entry("a");
    let current = guard.snapshot().expect("snapshot kept");

    assert_eq!(pinned.entries(), &[entry("a", 2), entry("b", 3)]);
    assert_eq!(current.entries(), &[entry("b", 3), entry("c", 4)]);
    assert_eq!(guard.entry("a"), None);
    assert_eq!(guard.entry("c"), Some(4));
}

#[tokio::test]
async fn adding_a_known_entry_keeps_the_snapshot() {
    let cache = DirectoryCache::new(Duration::from_secs(5));
    let mut guard = cache.reset_and_lock().await;
    guard.install_snapshot(snapshot(&[("a", 2)]), 1);
    let before = guard.snapshot().expect("snapshot installed");

    guard.add_entry("a", 2);
    let after = guard.snapshot().expect("snapshot kept");
    assert!(Arc::ptr_eq(&before, &after));

    // Same name, new object: the entry is replaced, not duplicated.
    guard.add_entry("a", 5);
    let after = guard.snapshot().expect("snapshot kept");
    assert_eq!(after.entries(), &[entry("a", 5)]);
}

#[tokio::test]
async fn matching_change_info_keeps_the_cache() {
    let cache = DirectoryCache::new(Duration::from_secs(5));
    let mut guard = cache.reset_and_lock().await;
    guard.install_snapshot(snapshot(&[("a", 2)]), 7);

    guard.validate_change_info(7);
    assert!(!guard.is_trashed());
    assert_eq!(guard.entry("a"), Some(2));
}

#[tokio::test]
async fn differing_change_info_trashes_the_cache() {
    let cache = DirectoryCache::new(Duration::from_secs(5));
    let mut guard = cache.reset_and_lock().await;
    guard.install_snapshot(snapshot(&[("a", 2)]), 7);
    let pinned = guard.snapshot().expect("snapshot installed");

    guard.validate_change_info(8);
    assert!(guard.is_trashed());
    assert_eq!(guard.entry("a"), None);
    assert!(guard.snapshot().is_none());
    assert_eq!(guard.change_info(), 8);

    // Entries added while trashed are ignored.
    guard.add_entry("b", 3);
    assert_eq!(guard.entry("b"), None);
    drop(guard);

    assert!(cache.lock().await.is_none());
    // A reader that pinned the old listing still sees it.
    assert_eq!(pinned.find("a"), Some(2));
}

#[tokio::test]
async fn reset_starts_over() {
    let cache = DirectoryCache::new(Duration::from_secs(5));
    let mut guard = cache.reset_and_lock().await;
    guard.install_snapshot(snapshot(&[("a", 2)]), 1);
    guard.trash();
    drop(guard);

    let mut guard = cache.reset_and_lock().await;
    assert!(!guard.is_trashed());
    assert!(guard.snapshot().is_none());
    guard.add_entry("b", 3);
    assert_eq!(guard.entry("b"), Some(3));
}

#[tokio::test]
async fn cache_expires_after_its_ttl() {
    let cache = DirectoryCache::new(Duration::from_millis(20));
    let mut guard = cache.reset_and_lock().await;
    guard.install_snapshot(snapshot(&[]), 1);
    assert!(!guard.is_expired());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(guard.is_expired());
    guard.touch();
    assert!(!guard.is_expired());
}

#[test]
fn snapshot_lookup() {
    let listing = snapshot(&[("x", 1), ("y", 2)]);
    assert_eq!(listing.len(), 2);
    assert!(!listing.is_empty());
    assert_eq!(listing.get(1), Some(&entry("y", 2)));
    assert_eq!(listing.get(2), None);
    assert_eq!(listing.find("y"), Some(2));
    assert_eq!(listing.find("z"), None);
}
