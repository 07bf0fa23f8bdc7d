//! Listing cache and revalidation hooks.
//!
//! Stores call [`Revalidate::revalidate`] after every write so that cached
//! thread listings never outlive the records they were built from. The HTTP
//! server shares one [`ListingCache`] between its handlers and the store;
//! the CLI uses [`NoopRevalidate`].

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::models::ChatDocumentRecord;

/// Identifies the cached view a write invalidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevalidateScope {
    pub page: String,
    pub params: String,
}

impl RevalidateScope {
    /// The chat page of one thread.
    pub fn chat_thread(thread_id: &str) -> Self {
        Self {
            page: "chat".to_string(),
            params: thread_id.to_string(),
        }
    }
}

pub trait Revalidate: Send + Sync {
    fn revalidate(&self, scope: &RevalidateScope);
}

pub struct NoopRevalidate;

impl Revalidate for NoopRevalidate {
    fn revalidate(&self, _scope: &RevalidateScope) {}
}

/// Threads held before the cache starts over.
pub const MAX_CACHED_THREADS: usize = 1024;

#[derive(Default)]
struct Listings {
    threads: HashMap<String, Vec<ChatDocumentRecord>>,
    generation: u64,
}

/// Per-thread memo of `list_by_thread` results.
///
/// Every revalidation bumps a generation counter. A reader takes
/// [`ListingCache::generation`] before querying the store and hands it back
/// to [`ListingCache::put`], which drops the result if any write landed in
/// between.
#[derive(Default)]
pub struct ListingCache {
    inner: RwLock<Listings>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).generation
    }

    pub fn get(&self, thread_id: &str) -> Option<Vec<ChatDocumentRecord>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .threads
            .get(thread_id)
            .cloned()
    }

    /// Store a listing read under `generation`. Returns false when the
    /// listing is stale and was not cached.
    pub fn put(
        &self,
        thread_id: &str,
        generation: u64,
        records: Vec<ChatDocumentRecord>,
    ) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.generation != generation {
            debug!(thread = %thread_id, "stale listing not cached");
            return false;
        }
        if inner.threads.len() >= MAX_CACHED_THREADS && !inner.threads.contains_key(thread_id) {
            inner.threads.clear();
        }
        inner.threads.insert(thread_id.to_string(), records);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Revalidate for ListingCache {
    fn revalidate(&self, scope: &RevalidateScope) {
        if scope.page != "chat" {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.generation = inner.generation.wrapping_add(1);
        let removed = inner.threads.remove(&scope.params).is_some();
        debug!(thread = %scope.params, removed, "listing cache revalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(thread: &str) -> ChatDocumentRecord {
        ChatDocumentRecord {
            id: "d1".to_string(),
            chat_thread_id: thread.to_string(),
            user_id: "u".to_string(),
            created_at: Utc::now(),
            doc_type: crate::models::CHAT_DOCUMENT_TYPE.to_string(),
            is_deleted: false,
            name: "a.pdf".to_string(),
        }
    }

    #[test]
    fn revalidation_drops_only_the_scoped_thread() {
        let cache = ListingCache::new();
        cache.put("t1", 0, vec![record("t1")]);
        cache.put("t2", 0, vec![record("t2")]);

        cache.revalidate(&RevalidateScope::chat_thread("t1"));

        assert!(cache.get("t1").is_none());
        assert_eq!(cache.get("t2").unwrap().len(), 1);
    }

    #[test]
    fn other_pages_are_ignored() {
        let cache = ListingCache::new();
        cache.put("t1", 0, vec![record("t1")]);
        cache.revalidate(&RevalidateScope {
            page: "settings".to_string(),
            params: "t1".to_string(),
        });
        assert!(cache.get("t1").is_some());
    }

    #[test]
    fn listing_read_before_a_write_is_not_cached() {
        let cache = ListingCache::new();
        let generation = cache.generation();

        // A create lands while the listing query is in flight.
        cache.revalidate(&RevalidateScope::chat_thread("t1"));

        assert!(!cache.put("t1", generation, Vec::new()));
        assert!(cache.get("t1").is_none());

        assert!(cache.put("t1", cache.generation(), vec![record("t1")]));
        assert_eq!(cache.get("t1").unwrap().len(), 1);
    }

    #[test]
    fn cache_starts_over_when_full() {
        let cache = ListingCache::new();
        for i in 0..MAX_CACHED_THREADS {
            cache.put(&format!("t{}", i), 0, vec![record("t")]);
        }
        assert_eq!(cache.len(), MAX_CACHED_THREADS);

        // Refreshing a cached thread keeps the rest.
        cache.put("t0", 0, Vec::new());
        assert_eq!(cache.len(), MAX_CACHED_THREADS);

        cache.put("overflow", 0, vec![record("overflow")]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("overflow").is_some());
    }
}
