//! Directory contents cache.
//!
//! Each directory inode owns one [DirectoryCache] holding the names it has
//! seen, the server change attribute they were read under, and the last full
//! listing as a shared [DirectoryCacheSnapshot].
//!
//! The cache moves between two states:
//!
//! - valid: entries can be trusted until the expiry time, after which the
//!   owner checks the directory's change attribute with the server;
//! - trashed: a change attribute disagreed with the cached one, so every
//!   entry was dropped. [DirectoryCache::lock] refuses a trashed cache and
//!   the owner rebuilds it with [DirectoryCache::reset_and_lock].
//!
//! Snapshots are reference counted on their own. A reader iterating a
//! listing keeps its snapshot even if the cache is trashed or updated
//! meanwhile; updates copy the snapshot instead of changing it in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::protocol::xdr::nfs4::changeid4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameCacheEntry {
    pub name: String,
    pub id: u64,
}

/// A full directory listing, in server order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryCacheSnapshot {
    entries: Vec<NameCacheEntry>,
}

impl DirectoryCacheSnapshot {
    pub fn new(entries: Vec<NameCacheEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[NameCacheEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&NameCacheEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<u64> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.id)
    }
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, u64>,
    snapshot: Option<Arc<DirectoryCacheSnapshot>>,
    change: changeid4,
    expire: Instant,
    trashed: bool,
}

#[derive(Debug)]
pub struct DirectoryCache {
    state: Mutex<CacheState>,
    ttl: Duration,
}

impl DirectoryCache {
    /// Creates a cache that has not been read yet, and is therefore trashed.
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                snapshot: None,
                change: 0,
                expire: Instant::now(),
                trashed: true,
            }),
            ttl,
        }
    }

    /// Locks the cache, or returns `None` if it is trashed and must be
    /// rebuilt first.
    pub async fn lock(&self) -> Option<DirectoryCacheGuard<'_>> {
        let state = self.state.lock().await;
        if state.trashed {
            return None;
        }
        Some(DirectoryCacheGuard { state, ttl: self.ttl })
    }

    /// Locks the cache after emptying it and starting a new expiry window.
    pub async fn reset_and_lock(&self) -> DirectoryCacheGuard<'_> {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.snapshot = None;
        state.trashed = false;
        state.expire = Instant::now() + self.ttl;
        DirectoryCacheGuard { state, ttl: self.ttl }
    }
}

/// Exclusive access to a [DirectoryCache].
#[derive(Debug)]
pub struct DirectoryCacheGuard<'a> {
    state: MutexGuard<'a, CacheState>,
    ttl: Duration,
}

impl DirectoryCacheGuard<'_> {
    /// Drops every entry and the snapshot.
    pub fn trash(&mut self) {
        debug!("trashing directory cache");
        self.state.entries.clear();
        self.state.snapshot = None;
        self.state.trashed = true;
    }

    pub fn is_trashed(&self) -> bool {
        self.state.trashed
    }

    pub fn add_entry(&mut self, name: &str, id: u64) {
        if self.state.trashed {
            return;
        }
        if let Some(previous) = self.state.entries.insert(name.to_string(), id) {
            if previous == id {
                return;
            }
        }
        if let Some(snapshot) = self.state.snapshot.as_mut() {
            let snapshot = Arc::make_mut(snapshot);
            snapshot.entries.retain(|e| e.name != name);
            snapshot.entries.push(NameCacheEntry { name: name.to_string(), id });
        }
    }

    pub fn remove_entry(&mut self, name: &str) {
        self.state.entries.remove(name);
        if let Some(snapshot) = self.state.snapshot.as_mut() {
            if snapshot.find(name).is_some() {
                Arc::make_mut(snapshot).entries.retain(|e| e.name != name);
            }
        }
    }

    pub fn entry(&self, name: &str) -> Option<u64> {
        self.state.entries.get(name).copied()
    }

    /// Trashes the cache and adopts `change` if it differs from the cached
    /// change attribute. A matching value changes nothing.
    pub fn validate_change_info(&mut self, change: changeid4) {
        if self.state.change == change {
            return;
        }
        warn!("directory changed on server ({} -> {}), dropping cache", self.state.change, change);
        self.trash();
        self.state.change = change;
        self.state.expire = Instant::now() + self.ttl;
    }

    /// Records the change attribute after a modification this client made.
    pub fn set_change_info(&mut self, change: changeid4) {
        self.state.change = change;
    }

    pub fn change_info(&self) -> changeid4 {
        self.state.change
    }

    pub fn snapshot(&self) -> Option<Arc<DirectoryCacheSnapshot>> {
        self.state.snapshot.clone()
    }

    /// Installs a fresh listing read under change attribute `change`; the
    /// cache becomes valid again.
    pub fn install_snapshot(&mut self, snapshot: Arc<DirectoryCacheSnapshot>, change: changeid4) {
        self.state.entries =
            snapshot.entries.iter().map(|e| (e.name.clone(), e.id)).collect();
        self.state.snapshot = Some(snapshot);
        self.state.change = change;
        self.state.trashed = false;
        self.state.expire = Instant::now() + self.ttl;
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.state.expire
    }

    /// Starts a new expiry window after the change attribute was confirmed.
    pub fn touch(&mut self) {
        self.state.expire = Instant::now() + self.ttl;
    }
}
