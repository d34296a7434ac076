//! Cache key construction.
//!
//! A key is built from the route identity, the resolved branch (when the
//! route is a branch point), the wildcard captures, the request parameters
//! the route declares cache-relevant, and any key material the pipeline
//! components contribute. Its canonical form is the JSON serialization of
//! those fields in that order; parameters are sorted by name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::routing::Captures;

/// Identity of a cacheable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    route: String,
    branch: Option<String>,
    captures: Vec<String>,
    params: BTreeMap<String, String>,
    components: Vec<String>,
}

impl CacheKey {
    pub fn builder(route: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder {
            key: CacheKey {
                route: route.into(),
                branch: None,
                captures: Vec::new(),
                params: BTreeMap::new(),
                components: Vec::new(),
            },
        }
    }

    /// Key for a route with nothing but positional captures.
    pub fn simple<I, S>(route: impl Into<String>, captures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = Self::builder(route);
        builder.key.captures = captures.into_iter().map(Into::into).collect();
        builder.build()
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn captures(&self) -> &[String] {
        &self.captures
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let canonical = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&canonical)
    }
}

/// Builder for [`CacheKey`].
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    key: CacheKey,
}

impl CacheKeyBuilder {
    /// Key the entry on the branch taken at a branch point.
    pub fn branch(mut self, label: impl Into<String>) -> Self {
        self.key.branch = Some(label.into());
        self
    }

    pub fn captures(mut self, captures: &Captures) -> Self {
        self.key.captures = captures.as_slice().to_vec();
        self
    }

    /// Fold the declared parameters present in the request into the key.
    /// Absent parameters are left out, so "absent" and "empty" differ.
    pub fn params(mut self, declared: &[String], request: &BTreeMap<String, String>) -> Self {
        for name in declared {
            if let Some(value) = request.get(name) {
                self.key.params.insert(name.clone(), value.clone());
            }
        }
        self
    }

    pub fn component(mut self, material: impl Into<String>) -> Self {
        self.key.components.push(material.into());
        self
    }

    pub fn components<I: IntoIterator<Item = String>>(mut self, material: I) -> Self {
        self.key.components.extend(material);
        self
    }

    pub fn build(self) -> CacheKey {
        self.key
    }
}
