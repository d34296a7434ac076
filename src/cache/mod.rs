//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Request path:
//!     key.rs (route + branch + captures + declared params + component material)
//!     → coordinator.rs resolve()
//!         stored validity Valid   → UseCached
//!         stored validity Invalid → Recompute
//!         stored validity Unknown → fetch fresh validity, compare
//!     → on Recompute: pipeline runs, coordinator.rs store()
//!
//! Invalidation:
//!     explicit key / predicate / clear
//!     InvalidationEvent → registered invalidators → keys removed
//!
//! Preemptive refresh (refresh.rs):
//!     Periodic timer per key
//!     → producer on blocking pool
//!     → store with expiry bound, or keep previous entry on failure
//! ```
//!
//! # Design Decisions
//! - One coordinator per service, injected as `Arc<dyn CacheCoordinator>`
//! - Storage may evict any entry at any time; absence is always a miss
//! - Cache failures never fail a request; they fall back to recompute

pub mod coordinator;
pub mod key;
pub mod refresh;
pub mod store;
pub mod validity;

pub use coordinator::{
    CacheCoordinator, CacheError, EventInvalidator, FreshValidity, InMemoryCoordinator, InvalidationEvent,
    Resolution, RevalidationError, ValidityProvider,
};
pub use key::{CacheKey, CacheKeyBuilder};
pub use refresh::{Producer, ProducerError, RefreshError, RefreshOutcome, RefreshScheduler};
pub use store::{Artifact, CacheEntry, EntryStore};
pub use validity::{Validity, ValidityDescriptor};
