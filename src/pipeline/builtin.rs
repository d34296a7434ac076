//! Built-in components.
//!
//! | type         | role        | parameters                 |
//! |--------------|-------------|----------------------------|
//! | `static`     | generator   | `text`, `element`          |
//! | `substitute` | transformer | `from`, `to`               |
//! | `markup`     | serializer  |                            |
//! | `text`       | serializer  |                            |
//! | `file`       | reader      | `src`, `mime-type`         |

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::cache::validity::ValidityDescriptor;
use crate::config::schema::ComponentConfig;
use crate::pipeline::component::{
    EventConsumer, Generator, PipelineEvent, ProcessingContext, Reader, Serializer, StageError, Transformer,
};
use crate::pipeline::factory::FactoryError;

/// Emits one element holding a fixed text.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    element: String,
    text: String,
}

impl StaticGenerator {
    pub fn new(element: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            text: text.into(),
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Self {
        let element = config.params.get("element").map(String::as_str).unwrap_or("page");
        let text = config.params.get("text").map(String::as_str).unwrap_or_default();
        Self::new(element, text)
    }
}

impl Generator for StaticGenerator {
    fn generate(&mut self, out: &mut dyn EventConsumer) -> Result<(), StageError> {
        out.consume(PipelineEvent::StartDocument)?;
        out.consume(PipelineEvent::start(self.element.clone()))?;
        if !self.text.is_empty() {
            out.consume(PipelineEvent::text(self.text.clone()))?;
        }
        out.consume(PipelineEvent::end(self.element.clone()))?;
        out.consume(PipelineEvent::EndDocument)
    }

    fn validity(&self) -> Option<ValidityDescriptor> {
        Some(ValidityDescriptor::Always)
    }

    fn cache_key(&self) -> Option<String> {
        Some(format!("static:{}:{}", self.element, self.text))
    }
}

/// Replaces every occurrence of `from` with `to` in text events.
#[derive(Debug, Clone)]
pub struct SubstituteTransformer {
    from: String,
    to: String,
}

impl SubstituteTransformer {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, FactoryError> {
        let from = config.params.get("from").ok_or_else(|| FactoryError::missing(config, "from"))?;
        if from.is_empty() {
            return Err(FactoryError::InvalidParameter {
                role: config.role.clone(),
                param: "from".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let to = config.params.get("to").map(String::as_str).unwrap_or_default();
        Ok(Self::new(from.as_str(), to))
    }
}

impl Transformer for SubstituteTransformer {
    fn transform(&mut self, event: PipelineEvent, out: &mut dyn EventConsumer) -> Result<(), StageError> {
        match event {
            PipelineEvent::Text(text) => out.consume(PipelineEvent::Text(text.replace(&self.from, &self.to))),
            other => out.consume(other),
        }
    }

    fn cache_key(&self) -> Option<String> {
        Some(format!("substitute:{}>{}", self.from, self.to))
    }
}

/// Writes events as XML markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupSerializer;

impl Serializer for MarkupSerializer {
    fn mime_type(&self) -> &str {
        "application/xml"
    }

    fn serialize(&mut self, event: PipelineEvent, out: &mut dyn Write) -> Result<(), StageError> {
        match event {
            PipelineEvent::StartDocument => out.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?,
            PipelineEvent::StartElement { name, attributes } => {
                write!(out, "<{}", name)?;
                for (attr, value) in attributes {
                    write!(out, " {}=\"{}\"", attr, escape(&value))?;
                }
                out.write_all(b">")?;
            }
            PipelineEvent::Text(text) => out.write_all(escape(&text).as_bytes())?,
            PipelineEvent::EndElement { name } => write!(out, "</{}>", name)?,
            PipelineEvent::EndDocument => {}
        }
        Ok(())
    }
}

/// Writes only the text content of events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSerializer;

impl Serializer for TextSerializer {
    fn mime_type(&self) -> &str {
        "text/plain"
    }

    fn serialize(&mut self, event: PipelineEvent, out: &mut dyn Write) -> Result<(), StageError> {
        if let PipelineEvent::Text(text) = event {
            out.write_all(text.as_bytes())?;
        }
        Ok(())
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Streams a file from disk. Valid as long as its modification time holds.
#[derive(Debug, Clone)]
pub struct FileReader {
    path: PathBuf,
    mime_type: String,
    modified: Option<ValidityDescriptor>,
}

impl FileReader {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            modified: None,
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, FactoryError> {
        let src = config.params.get("src").ok_or_else(|| FactoryError::missing(config, "src"))?;
        let mime_type = config
            .params
            .get("mime-type")
            .map(String::as_str)
            .unwrap_or("application/octet-stream");
        Ok(Self::new(src.as_str(), mime_type))
    }

    fn stage_error(&self, e: io::Error) -> StageError {
        StageError {
            stage: "file".to_string(),
            message: format!("{}: {}", self.path.display(), e),
            source: Some(Box::new(e)),
        }
    }
}

impl Reader for FileReader {
    fn setup(&mut self, _ctx: &ProcessingContext) -> Result<(), StageError> {
        let metadata = std::fs::metadata(&self.path).map_err(|e| self.stage_error(e))?;
        self.modified = metadata.modified().ok().map(ValidityDescriptor::last_modified);
        Ok(())
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn read(&mut self, out: &mut dyn Write) -> Result<u64, StageError> {
        let mut file = File::open(&self.path).map_err(|e| self.stage_error(e))?;
        Ok(io::copy(&mut file, out)?)
    }

    fn validity(&self) -> Option<ValidityDescriptor> {
        self.modified.clone()
    }

    fn cache_key(&self) -> Option<String> {
        Some(format!("file:{}", self.path.display()))
    }
}
