//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check every route's pipeline, including each branch, is well formed
//! - Validate value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CoreConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{CoreConfig, PipelineConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("route #{0} has an empty name")]
    EmptyRouteName(usize),

    #[error("duplicate route name '{0}'")]
    DuplicateRouteName(String),

    #[error("route '{0}' has no pattern")]
    MissingPattern(String),

    #[error("route '{0}' needs a generator or a reader")]
    NoProducer(String),

    #[error("route '{0}' sets both a generator and a reader")]
    ConflictingProducers(String),

    #[error("route '{0}' has a generator but no serializer")]
    MissingSerializer(String),

    #[error("route '{0}' combines a reader with transformers or a serializer")]
    ReaderWithStages(String),

    #[error("route '{0}' references a component with an empty type")]
    EmptyComponentType(String),

    #[error("route '{0}' has a branch with an empty parameter name")]
    EmptyBranchParameter(String),

    #[error("cache.max_entries must be greater than zero")]
    InvalidCacheCapacity,

    #[error("refresh.jitter_ratio must be within [0, 1], got {0}")]
    InvalidJitterRatio(f64),
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &CoreConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cache.max_entries == 0 {
        errors.push(ValidationError::InvalidCacheCapacity);
    }
    if !(0.0..=1.0).contains(&config.refresh.jitter_ratio) {
        errors.push(ValidationError::InvalidJitterRatio(config.refresh.jitter_ratio));
    }

    let mut seen = HashSet::new();
    for (index, route) in config.routes.iter().enumerate() {
        if route.name.trim().is_empty() {
            errors.push(ValidationError::EmptyRouteName(index));
        } else if !seen.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRouteName(route.name.clone()));
        }

        if route.pattern.is_none() {
            errors.push(ValidationError::MissingPattern(route.name.clone()));
        }

        validate_pipeline(&route.name, &route.pipeline, &mut errors);
        for branch in &route.branches {
            let label = format!("{}[{}]", route.name, branch.label());
            if branch.parameter.trim().is_empty() {
                errors.push(ValidationError::EmptyBranchParameter(route.name.clone()));
            }
            validate_pipeline(&label, &route.pipeline.overlay(&branch.pipeline), &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_pipeline(route: &str, pipeline: &PipelineConfig, errors: &mut Vec<ValidationError>) {
    match (&pipeline.generator, &pipeline.reader) {
        (None, None) => errors.push(ValidationError::NoProducer(route.to_string())),
        (Some(_), Some(_)) => errors.push(ValidationError::ConflictingProducers(route.to_string())),
        (Some(_), None) => {
            if pipeline.serializer.is_none() {
                errors.push(ValidationError::MissingSerializer(route.to_string()));
            }
        }
        (None, Some(_)) => {
            if !pipeline.transformers.is_empty() || pipeline.serializer.is_some() {
                errors.push(ValidationError::ReaderWithStages(route.to_string()));
            }
        }
    }

    let mut components = pipeline
        .generator
        .iter()
        .chain(pipeline.reader.iter())
        .chain(pipeline.transformers.iter())
        .chain(pipeline.serializer.iter());
    if components.any(|c| c.role.trim().is_empty()) {
        errors.push(ValidationError::EmptyComponentType(route.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BranchConfig, ComponentConfig, RouteConfig};

    fn generator_route(name: &str) -> RouteConfig {
        let mut route = RouteConfig::new(name, "docs/*");
        route.pipeline.generator = Some(ComponentConfig::new("static"));
        route.pipeline.serializer = Some(ComponentConfig::new("markup"));
        route
    }

    #[test]
    fn test_valid_config() {
        let mut config = CoreConfig::default();
        config.routes.push(generator_route("docs"));
        let mut reader = RouteConfig::new("assets", "assets/**");
        reader.pipeline.reader = Some(ComponentConfig::new("file"));
        config.routes.push(reader);

        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = CoreConfig::default();
        config.cache.max_entries = 0;
        config.routes.push(generator_route("docs"));
        config.routes.push(generator_route("docs"));
        let mut broken = RouteConfig::new("broken", "x");
        broken.pattern = None;
        broken.pipeline.generator = Some(ComponentConfig::new("static"));
        config.routes.push(broken);

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidCacheCapacity));
        assert!(errors.contains(&ValidationError::DuplicateRouteName("docs".into())));
        assert!(errors.contains(&ValidationError::MissingPattern("broken".into())));
        assert!(errors.contains(&ValidationError::MissingSerializer("broken".into())));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_reader_with_stages_rejected() {
        let mut config = CoreConfig::default();
        let mut route = RouteConfig::new("assets", "assets/**");
        route.pipeline.reader = Some(ComponentConfig::new("file"));
        route.pipeline.serializer = Some(ComponentConfig::new("markup"));
        config.routes.push(route);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::ReaderWithStages("assets".into())]);
    }

    #[test]
    fn test_branch_validated_against_defaults() {
        let mut config = CoreConfig::default();
        let mut route = generator_route("docs");
        route.branches.push(BranchConfig {
            parameter: "format".into(),
            equals: "raw".into(),
            pipeline: PipelineConfig {
                generator: Some(ComponentConfig::new("")),
                ..PipelineConfig::default()
            },
        });
        config.routes.push(route);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::EmptyComponentType("docs[format=raw]".into())]
        );
    }

    #[test]
    fn test_jitter_range() {
        let mut config = CoreConfig::default();
        config.refresh.jitter_ratio = 1.5;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::InvalidJitterRatio(1.5)]);
    }
}
