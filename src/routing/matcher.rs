//! Route matching conditions.
//!
//! # Responsibilities
//! - Decide whether a normalized URI selects a route
//! - Extract the captures a matched route hands to its pipeline
//!
//! # Design Decisions
//! - Matchers are pure: no state is kept between calls
//! - No regex; wildcard patterns only
//! - NoMatch is a value, never an error

use super::pattern::{CompiledPattern, MatchResult};

/// Trait for matching URIs against route conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Match the URI, returning the captures on success.
    fn match_uri(&self, uri: &str) -> MatchResult;

    /// Human-readable form for logs.
    fn describe(&self) -> String;
}

impl Matcher for CompiledPattern {
    fn match_uri(&self, uri: &str) -> MatchResult {
        CompiledPattern::match_uri(self, uri)
    }

    fn describe(&self) -> String {
        self.source().to_string()
    }
}
