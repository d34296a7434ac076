//! Pipeline stage contracts.
//!
//! # Stage Roles
//! ```text
//! Generator   → produces events from a source
//! Transformer → consumes events, pushes (possibly different) events on
//! Serializer  → consumes events, writes bytes
//! Reader      → writes bytes directly; replaces the whole event chain
//! ```
//!
//! Components are built per request by a factory and never shared between
//! requests, so they need `Send` but not `Sync`.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use thiserror::Error;
use uuid::Uuid;

use crate::cache::validity::ValidityDescriptor;
use crate::routing::pattern::Captures;

/// A structural event pushed from stage to stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StartDocument,
    StartElement {
        name: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
    EndElement {
        name: String,
    },
    EndDocument,
}

impl PipelineEvent {
    pub fn start(name: impl Into<String>) -> Self {
        PipelineEvent::StartElement {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn end(name: impl Into<String>) -> Self {
        PipelineEvent::EndElement { name: name.into() }
    }

    pub fn text(content: impl Into<String>) -> Self {
        PipelineEvent::Text(content.into())
    }
}

/// Failure inside a stage. Aborts the request; output is never cached.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed: {message}")]
pub struct StageError {
    pub stage: String,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StageError {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(stage: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            stage: stage.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<io::Error> for StageError {
    fn from(e: io::Error) -> Self {
        StageError::with_source("output", e)
    }
}

/// Receives events pushed by an upstream stage.
pub trait EventConsumer {
    fn consume(&mut self, event: PipelineEvent) -> Result<(), StageError>;
}

impl EventConsumer for Vec<PipelineEvent> {
    fn consume(&mut self, event: PipelineEvent) -> Result<(), StageError> {
        self.push(event);
        Ok(())
    }
}

/// Per-request state visible to every stage.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    request_id: Uuid,
    uri: String,
    captures: Captures,
    params: BTreeMap<String, String>,
}

impl ProcessingContext {
    pub fn new(uri: impl Into<String>, captures: Captures, params: BTreeMap<String, String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            uri: uri.into(),
            captures,
            params,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Substitute `{N}` with capture N and `{name}` with a request parameter.
    ///
    /// Unknown references become empty. `{{` and `}}` produce literal braces.
    pub fn resolve(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        out.push('{');
                        out.push_str(&name);
                        continue;
                    }
                    let value = match name.parse::<usize>() {
                        Ok(n) => self.captures.get(n),
                        Err(_) => self.param(&name),
                    };
                    out.push_str(value.unwrap_or_default());
                }
                other => out.push(other),
            }
        }
        out
    }
}

/// First stage of an event pipeline.
pub trait Generator: Send {
    fn setup(&mut self, _ctx: &ProcessingContext) -> Result<(), StageError> {
        Ok(())
    }

    fn generate(&mut self, out: &mut dyn EventConsumer) -> Result<(), StageError>;

    /// `None` means the output cannot be cached.
    fn validity(&self) -> Option<ValidityDescriptor> {
        None
    }

    fn cache_key(&self) -> Option<String> {
        None
    }
}

/// Middle stage: maps each upstream event onto zero or more downstream events.
pub trait Transformer: Send {
    fn setup(&mut self, _ctx: &ProcessingContext) -> Result<(), StageError> {
        Ok(())
    }

    fn transform(&mut self, event: PipelineEvent, out: &mut dyn EventConsumer) -> Result<(), StageError>;

    fn validity(&self) -> Option<ValidityDescriptor> {
        Some(ValidityDescriptor::Always)
    }

    fn cache_key(&self) -> Option<String> {
        None
    }
}

/// Last stage of an event pipeline: turns events into bytes.
pub trait Serializer: Send {
    fn setup(&mut self, _ctx: &ProcessingContext) -> Result<(), StageError> {
        Ok(())
    }

    fn mime_type(&self) -> &str;

    fn serialize(&mut self, event: PipelineEvent, out: &mut dyn Write) -> Result<(), StageError>;

    fn validity(&self) -> Option<ValidityDescriptor> {
        Some(ValidityDescriptor::Always)
    }

    fn cache_key(&self) -> Option<String> {
        None
    }
}

/// Produces the response bytes on its own, without an event chain.
pub trait Reader: Send {
    fn setup(&mut self, _ctx: &ProcessingContext) -> Result<(), StageError> {
        Ok(())
    }

    fn mime_type(&self) -> &str;

    /// Write the whole body. Returns the number of bytes written.
    fn read(&mut self, out: &mut dyn Write) -> Result<u64, StageError>;

    fn validity(&self) -> Option<ValidityDescriptor> {
        None
    }

    fn cache_key(&self) -> Option<String> {
        None
    }
}

impl fmt::Debug for dyn Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Generator")
    }
}

impl fmt::Debug for dyn Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transformer")
    }
}

impl fmt::Debug for dyn Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Serializer")
    }
}

impl fmt::Debug for dyn Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reader")
    }
}
