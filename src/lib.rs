//! URI-driven processing pipelines with validity-based response caching.
//!
//! # Architecture Overview
//!
//! ```text
//!     Request URI
//!         │
//!         ▼
//!   ┌──────────────┐   no match
//!   │   routing    │──────────────▶ None
//!   │ pattern +    │
//!   │ router       │
//!   └──────┬───────┘
//!          │ route + captures
//!          ▼
//!   ┌──────────────┐       ┌──────────────────┐
//!   │   pipeline   │──────▶│      cache       │
//!   │ factory +    │ key + │ coordinator      │
//!   │ assembler    │ valid.│ store / refresh  │
//!   └──────┬───────┘◀──────└──────────────────┘
//!          │ hit: cached bytes / miss: run stages, store
//!          ▼
//!       Response
//!
//!   Cross-cutting: config (TOML, hot reload), observability
//!   (tracing, metrics), lifecycle (service root, shutdown)
//! ```

pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod routing;

pub use cache::{CacheCoordinator, CacheKey, InMemoryCoordinator, ValidityDescriptor};
pub use config::CoreConfig;
pub use lifecycle::{CacheStatus, PipelineService, Request, ResponseInfo, ServiceError, Shutdown};
pub use pipeline::{ComponentRegistry, ProcessingPipeline};
pub use routing::{compile, MatchResult, Router};
