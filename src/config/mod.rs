//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CoreConfig (validated, immutable)
//!     → PipelineService builds the route table from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → PipelineService swaps the route table and clears the cache
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::BranchConfig;
pub use schema::CacheConfig;
pub use schema::ComponentConfig;
pub use schema::CoreConfig;
pub use schema::ObservabilityConfig;
pub use schema::OutputMode;
pub use schema::PipelineConfig;
pub use schema::RefreshConfig;
pub use schema::RouteConfig;
