//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pipeline_router::cache::ValidityDescriptor;
use pipeline_router::config::{ComponentConfig, CoreConfig, OutputMode, RouteConfig};
use pipeline_router::pipeline::{
    ComponentRegistry, EventConsumer, Generator, PipelineEvent, StageError, Transformer,
};

/// Observes and steers the recording components.
#[derive(Clone, Default)]
pub struct Recorder {
    generated: Arc<AtomicUsize>,
    validity: Arc<Mutex<Option<ValidityDescriptor>>>,
}

impl Recorder {
    pub fn new(validity: Option<ValidityDescriptor>) -> Self {
        Self {
            generated: Arc::new(AtomicUsize::new(0)),
            validity: Arc::new(Mutex::new(validity)),
        }
    }

    /// How many times a recording generator produced output.
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Change what the source reports as its validity.
    pub fn set_validity(&self, validity: Option<ValidityDescriptor>) {
        *self.validity.lock().unwrap() = validity;
    }
}

/// Emits its `text` parameter and counts every run.
pub struct RecordingGenerator {
    text: String,
    recorder: Recorder,
}

impl Generator for RecordingGenerator {
    fn generate(&mut self, out: &mut dyn EventConsumer) -> Result<(), StageError> {
        self.recorder.generated.fetch_add(1, Ordering::SeqCst);
        out.consume(PipelineEvent::StartDocument)?;
        out.consume(PipelineEvent::text(self.text.clone()))?;
        out.consume(PipelineEvent::EndDocument)
    }

    fn validity(&self) -> Option<ValidityDescriptor> {
        self.recorder.validity.lock().unwrap().clone()
    }
}

/// Passes events through until the first text event, then fails.
pub struct FailingTransformer;

impl Transformer for FailingTransformer {
    fn transform(&mut self, event: PipelineEvent, out: &mut dyn EventConsumer) -> Result<(), StageError> {
        if let PipelineEvent::Text(_) = event {
            return Err(StageError::new("failing", "injected failure"));
        }
        out.consume(event)
    }
}

/// Built-in components plus `recording` (generator) and `failing` (transformer).
pub fn registry(recorder: &Recorder) -> ComponentRegistry {
    let mut registry = ComponentRegistry::with_builtins();
    let recorder = recorder.clone();
    registry.register_generator("recording", move |config| {
        Ok(Box::new(RecordingGenerator {
            text: config.params.get("text").cloned().unwrap_or_default(),
            recorder: recorder.clone(),
        }))
    });
    registry.register_transformer("failing", |_| Ok(Box::new(FailingTransformer)));
    registry
}

/// Fluent builder for test configurations.
#[derive(Default)]
pub struct ConfigBuilder {
    config: CoreConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, route: RouteConfig) -> Self {
        self.config.routes.push(route);
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.config.cache.max_entries = max_entries;
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.config.refresh.jitter_ratio = ratio;
        self
    }

    pub fn build(self) -> CoreConfig {
        self.config
    }
}

/// A route whose generator is `role` with a `text` parameter, serialized as text.
pub fn text_route(name: &str, pattern: &str, role: &str, text: &str) -> RouteConfig {
    let mut route = RouteConfig::new(name, pattern);
    route.pipeline.generator = Some(ComponentConfig::new(role).with_param("text", text));
    route.pipeline.serializer = Some(ComponentConfig::new("text"));
    route
}

pub fn buffered(mut route: RouteConfig) -> RouteConfig {
    route.output = OutputMode::Buffered;
    route
}
