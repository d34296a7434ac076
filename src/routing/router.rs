//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a URI
//! - Return matched route with captures, or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan over routes (acceptable for typical route counts)
//! - Explicit NoMatch rather than silent default

use std::sync::Arc;

use thiserror::Error;

use crate::config::schema::RouteConfig;
use crate::observability::metrics;
use crate::routing::matcher::Matcher;
use crate::routing::pattern::{compile, Captures, MatchResult};

/// Errors raised while compiling a route table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    /// The route definition carries no pattern at all.
    #[error("malformed pattern: route '{route}' has no pattern")]
    Missing { route: String },
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    name: String,
    priority: u32,
    matcher: Box<dyn Matcher>,
    config: RouteConfig,
}

impl Route {
    /// Compile a route from its configuration.
    pub fn compile(config: &RouteConfig) -> Result<Self, PatternError> {
        let pattern = config.pattern.as_deref().ok_or_else(|| PatternError::Missing {
            route: config.name.clone(),
        })?;

        Ok(Self {
            name: config.name.clone(),
            priority: config.priority,
            matcher: Box::new(compile(pattern)),
            config: config.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    pub fn matcher(&self) -> &dyn Matcher {
        self.matcher.as_ref()
    }
}

/// A route selected for a URI together with its captures.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub captures: Captures,
}

/// Immutable, priority-ordered route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Arc<Route>>,
}

impl Router {
    /// Compile every route. Higher priority is checked first; equal
    /// priorities keep declaration order.
    pub fn new(configs: &[RouteConfig]) -> Result<Self, PatternError> {
        let mut routes = configs
            .iter()
            .map(|c| Route::compile(c).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Self { routes })
    }

    /// First route whose pattern matches the URI.
    pub fn route(&self, uri: &str) -> Option<RouteMatch> {
        for route in &self.routes {
            if let MatchResult::Matched(captures) = route.matcher.match_uri(uri) {
                tracing::debug!(uri, route = %route.name, captures = ?captures.as_slice(), "Route matched");
                metrics::record_route_match(true);
                return Some(RouteMatch {
                    route: route.clone(),
                    captures,
                });
            }
        }

        tracing::debug!(uri, "No route matched");
        metrics::record_route_match(false);
        None
    }

    /// Route names in match order.
    pub fn names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, pattern: &str, priority: u32) -> RouteConfig {
        let mut config = RouteConfig::new(name, pattern);
        config.priority = priority;
        config
    }

    #[test]
    fn test_first_match_wins() {
        let router = Router::new(&[
            route("one", "docs/*.html", 0),
            route("catch-all", "**", 0),
        ])
        .unwrap();

        let m = router.route("docs/index.html").unwrap();
        assert_eq!(m.route.name(), "one");
        assert_eq!(m.captures.as_slice(), &["index".to_string()]);

        let m = router.route("docs/a/index.html").unwrap();
        assert_eq!(m.route.name(), "catch-all");
    }

    #[test]
    fn test_priority_order() {
        let router = Router::new(&[
            route("low", "**", 0),
            route("high", "api/**", 10),
            route("also-low", "x", 0),
        ])
        .unwrap();

        assert_eq!(router.names(), vec!["high", "low", "also-low"]);
        assert_eq!(router.route("api/v1").unwrap().route.name(), "high");
    }

    #[test]
    fn test_no_match() {
        let router = Router::new(&[route("one", "docs/*", 0)]).unwrap();
        assert!(router.route("images/a.png").is_none());
        assert!(Router::default().route("").is_none());
    }

    #[test]
    fn test_missing_pattern() {
        let mut config = route("broken", "", 0);
        config.pattern = None;
        let err = Router::new(&[config]).unwrap_err();
        assert_eq!(err, PatternError::Missing { route: "broken".into() });
    }
}
