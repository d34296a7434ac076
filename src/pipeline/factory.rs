//! Component instantiation.
//!
//! # Responsibilities
//! - Map a configured component type name onto a constructor
//! - Substitute capture and request parameter references before construction
//! - Assemble a full pipeline from a route's pipeline configuration

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::config::schema::{ComponentConfig, OutputMode, PipelineConfig};
use crate::pipeline::assembler::{PipelineError, ProcessingPipeline};
use crate::pipeline::builtin;
use crate::pipeline::component::{Generator, ProcessingContext, Reader, Serializer, Transformer};

/// Component construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FactoryError {
    #[error("unknown {kind} type '{role}'")]
    UnknownComponent { kind: &'static str, role: String },

    #[error("{role}: missing required parameter '{param}'")]
    MissingParameter { role: String, param: String },

    #[error("{role}: invalid parameter '{param}': {reason}")]
    InvalidParameter { role: String, param: String, reason: String },
}

impl FactoryError {
    pub fn missing(config: &ComponentConfig, param: &str) -> Self {
        FactoryError::MissingParameter {
            role: config.role.clone(),
            param: param.to_string(),
        }
    }
}

/// Creates stage components by type name.
pub trait ComponentFactory: Send + Sync {
    fn generator(&self, config: &ComponentConfig) -> Result<Box<dyn Generator>, FactoryError>;

    fn transformer(&self, config: &ComponentConfig) -> Result<Box<dyn Transformer>, FactoryError>;

    fn serializer(&self, config: &ComponentConfig) -> Result<Box<dyn Serializer>, FactoryError>;

    fn reader(&self, config: &ComponentConfig) -> Result<Box<dyn Reader>, FactoryError>;
}

type Constructor<T> = Box<dyn Fn(&ComponentConfig) -> Result<Box<T>, FactoryError> + Send + Sync>;

/// Registry of component constructors keyed by type name.
#[derive(Default)]
pub struct ComponentRegistry {
    generators: HashMap<String, Constructor<dyn Generator>>,
    transformers: HashMap<String, Constructor<dyn Transformer>>,
    serializers: HashMap<String, Constructor<dyn Serializer>>,
    readers: HashMap<String, Constructor<dyn Reader>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in components.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_generator("static", |c| Ok(Box::new(builtin::StaticGenerator::from_config(c))));
        registry.register_transformer("substitute", |c| {
            Ok(Box::new(builtin::SubstituteTransformer::from_config(c)?))
        });
        registry.register_serializer("markup", |_| Ok(Box::new(builtin::MarkupSerializer)));
        registry.register_serializer("text", |_| Ok(Box::new(builtin::TextSerializer)));
        registry.register_reader("file", |c| Ok(Box::new(builtin::FileReader::from_config(c)?)));
        registry
    }

    pub fn register_generator<F>(&mut self, role: impl Into<String>, constructor: F)
    where
        F: Fn(&ComponentConfig) -> Result<Box<dyn Generator>, FactoryError> + Send + Sync + 'static,
    {
        self.generators.insert(role.into(), Box::new(constructor));
    }

    pub fn register_transformer<F>(&mut self, role: impl Into<String>, constructor: F)
    where
        F: Fn(&ComponentConfig) -> Result<Box<dyn Transformer>, FactoryError> + Send + Sync + 'static,
    {
        self.transformers.insert(role.into(), Box::new(constructor));
    }

    pub fn register_serializer<F>(&mut self, role: impl Into<String>, constructor: F)
    where
        F: Fn(&ComponentConfig) -> Result<Box<dyn Serializer>, FactoryError> + Send + Sync + 'static,
    {
        self.serializers.insert(role.into(), Box::new(constructor));
    }

    pub fn register_reader<F>(&mut self, role: impl Into<String>, constructor: F)
    where
        F: Fn(&ComponentConfig) -> Result<Box<dyn Reader>, FactoryError> + Send + Sync + 'static,
    {
        self.readers.insert(role.into(), Box::new(constructor));
    }
}

fn construct<T: ?Sized>(
    table: &HashMap<String, Constructor<T>>,
    kind: &'static str,
    config: &ComponentConfig,
) -> Result<Box<T>, FactoryError> {
    let constructor = table.get(&config.role).ok_or_else(|| FactoryError::UnknownComponent {
        kind,
        role: config.role.clone(),
    })?;
    constructor(config)
}

impl ComponentFactory for ComponentRegistry {
    fn generator(&self, config: &ComponentConfig) -> Result<Box<dyn Generator>, FactoryError> {
        construct(&self.generators, "generator", config)
    }

    fn transformer(&self, config: &ComponentConfig) -> Result<Box<dyn Transformer>, FactoryError> {
        construct(&self.transformers, "transformer", config)
    }

    fn serializer(&self, config: &ComponentConfig) -> Result<Box<dyn Serializer>, FactoryError> {
        construct(&self.serializers, "serializer", config)
    }

    fn reader(&self, config: &ComponentConfig) -> Result<Box<dyn Reader>, FactoryError> {
        construct(&self.readers, "reader", config)
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |table: Vec<&String>| {
            let mut table: Vec<_> = table.into_iter().cloned().collect();
            table.sort();
            table
        };
        f.debug_struct("ComponentRegistry")
            .field("generators", &names(self.generators.keys().collect()))
            .field("transformers", &names(self.transformers.keys().collect()))
            .field("serializers", &names(self.serializers.keys().collect()))
            .field("readers", &names(self.readers.keys().collect()))
            .finish()
    }
}

/// Copy of `config` with every parameter value resolved against `ctx`.
pub fn resolve_params(config: &ComponentConfig, ctx: &ProcessingContext) -> ComponentConfig {
    ComponentConfig {
        role: config.role.clone(),
        params: config
            .params
            .iter()
            .map(|(name, value)| (name.clone(), ctx.resolve(value)))
            .collect(),
    }
}

/// Instantiate and assemble the stages described by `config`.
pub fn build_pipeline(
    factory: &dyn ComponentFactory,
    config: &PipelineConfig,
    ctx: &ProcessingContext,
    output: OutputMode,
) -> Result<ProcessingPipeline, PipelineError> {
    let mut pipeline = ProcessingPipeline::new(output);

    if let Some(reader) = &config.reader {
        pipeline.set_reader(factory.reader(&resolve_params(reader, ctx))?)?;
        return Ok(pipeline);
    }

    if let Some(generator) = &config.generator {
        pipeline.set_generator(factory.generator(&resolve_params(generator, ctx))?)?;
    }
    for transformer in &config.transformers {
        pipeline.add_transformer(factory.transformer(&resolve_params(transformer, ctx))?)?;
    }
    if let Some(serializer) = &config.serializer {
        pipeline.set_serializer(factory.serializer(&resolve_params(serializer, ctx))?)?;
    }

    Ok(pipeline)
}
