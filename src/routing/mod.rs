//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Normalized URI
//!     → router.rs (route lookup, priority order)
//!     → matcher.rs (evaluate the route's match condition)
//!     → pattern.rs (wildcard matching, capture extraction)
//!     → Return: matched Route + captures, or NoMatch
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile wildcard patterns
//!     → Sort by priority
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex; wildcard patterns with first-fit literal search
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod pattern;
pub mod router;

pub use matcher::Matcher;
pub use pattern::{compile, Captures, CompiledPattern, MatchResult, Segment};
pub use router::{PatternError, Route, RouteMatch, Router};
