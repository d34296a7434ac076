//! Concurrent cache entry storage.
//!
//! # Design Decisions
//! - DashMap shards: lookups never contend on a global lock
//! - Entries are shared as `Arc` so no shard lock outlives a lookup
//! - Bounded: inserting past capacity evicts the oldest entry, so any
//!   entry may disappear at any time and absence is always a miss
//! - Eviction order lives beside the map; lookups never touch it

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::cache::key::CacheKey;
use crate::cache::validity::ValidityDescriptor;

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    content: Arc<[u8]>,
    mime_type: String,
}

impl Artifact {
    pub fn new(content: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            content: Arc::from(content.into()),
            mime_type: mime_type.into(),
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// A stored artifact with the validity it was computed under.
#[derive(Debug)]
pub struct CacheEntry {
    pub validity: ValidityDescriptor,
    pub artifact: Artifact,
}

impl CacheEntry {
    pub fn new(validity: ValidityDescriptor, artifact: Artifact) -> Self {
        Self {
            validity,
            artifact,
        }
    }
}

/// Bounded concurrent map of cache entries.
///
/// Writers keep an insertion-order queue under a mutex so eviction pops the
/// oldest record instead of scanning the map. Records for replaced or removed
/// entries go stale and are skipped when they reach the front.
#[derive(Debug)]
pub struct EntryStore {
    inner: DashMap<CacheKey, Slot>,
    order: Mutex<InsertionOrder>,
    max_entries: usize,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    entry: Arc<CacheEntry>,
}

#[derive(Debug, Default)]
struct InsertionOrder {
    next_seq: u64,
    queue: VecDeque<(u64, CacheKey)>,
}

impl EntryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: DashMap::new(),
            order: Mutex::new(InsertionOrder::default()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.inner.get(key).map(|r| Arc::clone(&r.value().entry))
    }

    /// Insert or replace. Returns the number of entries evicted to make room.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) -> usize {
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        let seq = order.next_seq;
        order.next_seq += 1;

        self.inner.insert(
            key.clone(),
            Slot {
                seq,
                entry: Arc::new(entry),
            },
        );
        order.queue.push_back((seq, key));

        let mut evicted = 0;
        while self.inner.len() > self.max_entries {
            let Some((victim_seq, victim)) = order.queue.pop_front() else { break };
            if victim_seq == seq {
                // Only the record just written is left.
                order.queue.push_front((victim_seq, victim));
                break;
            }
            if self.inner.remove_if(&victim, |_, slot| slot.seq == victim_seq).is_some() {
                tracing::debug!(key = %victim, "Evicted cache entry");
                evicted += 1;
            }
        }

        if order.queue.len() > self.max_entries.saturating_mul(2) {
            self.compact(&mut order);
        }
        evicted
    }

    /// Drop queue records whose entry was replaced or removed.
    fn compact(&self, order: &mut InsertionOrder) {
        order
            .queue
            .retain(|(seq, key)| self.inner.get(key).is_some_and(|slot| slot.seq == *seq));
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.inner.remove(key).is_some()
    }

    /// Remove every entry whose key matches. Returns how many were removed.
    pub fn remove_where(&self, predicate: &dyn Fn(&CacheKey) -> bool) -> usize {
        let before = self.inner.len();
        self.inner.retain(|key, _| !predicate(key));
        before.saturating_sub(self.inner.len())
    }

    pub fn clear(&self) -> usize {
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        let count = self.inner.len();
        self.inner.clear();
        order.queue.clear();
        count
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
