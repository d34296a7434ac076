//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (service.rs):
//!     CoreConfig → Validate → Compile routes → Coordinator + refresh scheduler
//!     → Optional metrics exporter
//!
//! Reload (service.rs):
//!     ConfigWatcher update → Validate → Swap route table → Clear cache
//!
//! Shutdown (shutdown.rs):
//!     trigger() → Refresh jobs stop → Reload task stops
//! ```
//!
//! # Design Decisions
//! - One service root owns every shared component; nothing is global
//! - Fail fast: an invalid startup config is an error, an invalid reload is logged

pub mod service;
pub mod shutdown;

pub use service::{CacheStatus, PipelineService, Request, ResponseInfo, ServiceError};
pub use shutdown::Shutdown;
