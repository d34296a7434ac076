//! Cache coordination: lookup, revalidation, storage and invalidation.
//!
//! # Resolve Decision Table
//! ```text
//! entry absent              → Recompute (provider not called)
//! stored.check() == Valid   → UseCached (provider not called)
//! stored.check() == Unknown → fetch fresh; stored vs fresh Valid → UseCached
//!                                          otherwise → Recompute
//! stored.check() == Invalid → fetch fresh; Recompute
//! ```
//!
//! # Design Decisions
//! - No lock is held while the validity provider runs
//! - Per-key last writer wins; no cross-key transactions
//! - Concurrent cold misses on one key may both recompute
//! - Failures never surface to the request: a failed revalidation is a
//!   recompute, a failed store is logged and skipped
//! - A stale entry is never evicted because revalidation failed

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::key::CacheKey;
use crate::cache::store::{Artifact, CacheEntry, EntryStore};
use crate::cache::validity::{Validity, ValidityDescriptor};
use crate::config::CacheConfig;
use crate::observability::metrics;

/// Why a fresh validity could not be produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RevalidationError {
    /// Some pipeline component cannot be cached.
    #[error("resource is not cacheable")]
    NotCacheable,

    /// The validity source failed.
    #[error("validity provider failed: {0}")]
    Provider(String),
}

/// Errors from storing an artifact.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("artifact of {size} bytes exceeds the {limit} byte limit")]
    ArtifactTooLarge { size: usize, limit: usize },
}

/// Fresh validity obtained while resolving a key.
#[derive(Debug, Clone, PartialEq)]
pub enum FreshValidity {
    /// The provider was not consulted.
    NotFetched,
    /// The provider returned this descriptor; store the recomputed artifact under it.
    Fetched(ValidityDescriptor),
    /// The provider failed or reported the resource uncacheable.
    Unavailable,
}

/// Outcome of [`CacheCoordinator::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    UseCached(Artifact),
    Recompute(FreshValidity),
}

/// An external state change that may invalidate cached renderings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl InvalidationEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Maps an event to the keys it invalidates.
pub type EventInvalidator = Box<dyn Fn(&InvalidationEvent) -> HashSet<CacheKey> + Send + Sync>;

/// Validity provider consulted by [`CacheCoordinator::resolve`].
pub type ValidityProvider<'a> = dyn Fn() -> Result<ValidityDescriptor, RevalidationError> + 'a;

/// Capability interface over the response cache.
pub trait CacheCoordinator: Send + Sync {
    /// Current entry for the key. Never computes anything.
    fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>>;

    /// Decide whether the cached artifact may be served.
    fn resolve(&self, key: &CacheKey, current_validity: &ValidityProvider<'_>) -> Resolution;

    /// Store an artifact, replacing any previous entry for the key.
    fn store(&self, key: CacheKey, validity: ValidityDescriptor, artifact: Artifact) -> Result<(), CacheError>;

    /// Remove the entry if present.
    fn invalidate(&self, key: &CacheKey);

    /// Remove every entry whose key matches.
    fn invalidate_where(&self, predicate: &dyn Fn(&CacheKey) -> bool) -> usize;

    /// Register an event to key-set mapping.
    fn invalidate_on_event(&self, invalidator: EventInvalidator);

    /// Deliver an event; every key a registered invalidator names is removed
    /// immediately. Returns the number of entries removed.
    fn notify(&self, event: &InvalidationEvent) -> usize;

    /// Drop every entry.
    fn clear(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-memory cache coordinator.
pub struct InMemoryCoordinator {
    entries: EntryStore,
    invalidators: RwLock<Vec<Arc<EventInvalidator>>>,
    max_artifact_bytes: usize,
}

impl InMemoryCoordinator {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: EntryStore::new(config.max_entries),
            invalidators: RwLock::new(Vec::new()),
            max_artifact_bytes: config.max_artifact_bytes,
        }
    }

    /// Keys currently cached, in no particular order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.keys()
    }

    fn fetch(&self, key: &CacheKey, provider: &ValidityProvider<'_>) -> FreshValidity {
        match provider() {
            Ok(fresh) => FreshValidity::Fetched(fresh),
            Err(RevalidationError::NotCacheable) => {
                // Nothing will be stored over it, so the entry would linger.
                tracing::debug!(key = %key, "Resource no longer cacheable, dropping entry");
                self.invalidate(key);
                FreshValidity::Unavailable
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Revalidation failed, keeping stale entry");
                metrics::record_revalidation_failure();
                FreshValidity::Unavailable
            }
        }
    }
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl std::fmt::Debug for InMemoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCoordinator")
            .field("entries", &self.entries.len())
            .field("max_artifact_bytes", &self.max_artifact_bytes)
            .finish()
    }
}

impl CacheCoordinator for InMemoryCoordinator {
    fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries.get(key)
    }

    fn resolve(&self, key: &CacheKey, current_validity: &ValidityProvider<'_>) -> Resolution {
        let Some(entry) = self.entries.get(key) else {
            tracing::debug!(key = %key, "Cache miss");
            metrics::record_cache_lookup("miss");
            return Resolution::Recompute(FreshValidity::NotFetched);
        };

        match entry.validity.check() {
            Validity::Valid => {
                tracing::debug!(key = %key, "Cache hit");
                metrics::record_cache_lookup("hit");
                Resolution::UseCached(entry.artifact.clone())
            }
            Validity::Unknown => match self.fetch(key, current_validity) {
                FreshValidity::Fetched(fresh) => {
                    if entry.validity.check_against(&fresh) == Validity::Valid {
                        tracing::debug!(key = %key, "Cache hit after revalidation");
                        metrics::record_cache_lookup("hit");
                        Resolution::UseCached(entry.artifact.clone())
                    } else {
                        tracing::debug!(key = %key, "Cached entry is stale");
                        metrics::record_cache_lookup("stale");
                        Resolution::Recompute(FreshValidity::Fetched(fresh))
                    }
                }
                other => {
                    metrics::record_cache_lookup("stale");
                    Resolution::Recompute(other)
                }
            },
            Validity::Invalid => {
                tracing::debug!(key = %key, "Cached entry is invalid");
                metrics::record_cache_lookup("stale");
                Resolution::Recompute(self.fetch(key, current_validity))
            }
        }
    }

    fn store(&self, key: CacheKey, validity: ValidityDescriptor, artifact: Artifact) -> Result<(), CacheError> {
        if artifact.len() > self.max_artifact_bytes {
            metrics::record_cache_store_failure();
            return Err(CacheError::ArtifactTooLarge {
                size: artifact.len(),
                limit: self.max_artifact_bytes,
            });
        }

        let evicted = self.entries.insert(key, CacheEntry::new(validity, artifact));
        if evicted > 0 {
            metrics::record_cache_invalidation("evicted", evicted);
        }
        metrics::record_cache_store();
        metrics::record_cache_size(self.entries.len());
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) {
        if self.entries.remove(key) {
            tracing::debug!(key = %key, "Invalidated cache entry");
            metrics::record_cache_invalidation("explicit", 1);
            metrics::record_cache_size(self.entries.len());
        }
    }

    fn invalidate_where(&self, predicate: &dyn Fn(&CacheKey) -> bool) -> usize {
        let removed = self.entries.remove_where(predicate);
        if removed > 0 {
            metrics::record_cache_invalidation("explicit", removed);
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    fn invalidate_on_event(&self, invalidator: EventInvalidator) {
        let mut invalidators = self.invalidators.write().unwrap_or_else(|e| e.into_inner());
        invalidators.push(Arc::new(invalidator));
    }

    fn notify(&self, event: &InvalidationEvent) -> usize {
        let invalidators: Vec<_> = self
            .invalidators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();

        let keys: HashSet<CacheKey> = invalidators.iter().flat_map(|inv| (**inv)(event)).collect();
        let removed = keys.iter().filter(|key| self.entries.remove(key)).count();

        tracing::debug!(event = %event.name, removed, "Processed invalidation event");
        if removed > 0 {
            metrics::record_cache_invalidation("event", removed);
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    fn clear(&self) -> usize {
        let removed = self.entries.clear();
        metrics::record_cache_invalidation("clear", removed);
        metrics::record_cache_size(0);
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
