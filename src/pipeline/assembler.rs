//! Pipeline assembly and execution.
//!
//! # State Machine
//! ```text
//! Empty ──set_generator──→ HasGenerator ──add_transformer──→ HasTransformers
//!   │                          │                               │  ↺ add_transformer
//!   │                          └──────set_serializer──────┐    │
//!   │                                                     ▼    ▼
//!   └────────────set_reader─────────────────────────────→ Sealed
//! ```
//!
//! # Design Decisions
//! - Transitions only move forward; anything else is an `InvalidPipelineError`
//! - Events are pushed synchronously through the chain, one stage driving the next
//! - Buffered output is opt-in per route, used when the content length must
//!   be known before the first byte is written

use std::io::{self, Write};

use thiserror::Error;

use crate::cache::validity::ValidityDescriptor;
use crate::config::schema::OutputMode;
use crate::pipeline::component::{
    EventConsumer, Generator, PipelineEvent, ProcessingContext, Reader, Serializer, StageError, Transformer,
};
use crate::pipeline::factory::FactoryError;

/// Assembly state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Empty,
    HasGenerator,
    HasTransformers,
    Sealed,
}

/// An operation attempted out of order. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid pipeline: cannot {operation} in state {state:?}")]
pub struct InvalidPipelineError {
    pub operation: &'static str,
    pub state: PipelineState,
}

impl InvalidPipelineError {
    fn new(operation: &'static str, state: PipelineState) -> Self {
        Self { operation, state }
    }
}

/// Errors raised while assembling or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Invalid(#[from] InvalidPipelineError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("output failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Factory(#[from] FactoryError),
}

/// What a completed run wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Known only in buffered mode, before any byte reached the output.
    pub content_length: Option<u64>,
    pub bytes_written: u64,
}

#[derive(Debug)]
enum Source {
    Generator(Box<dyn Generator>),
    Reader(Box<dyn Reader>),
}

/// A per-request stage chain.
#[derive(Debug)]
pub struct ProcessingPipeline {
    state: PipelineState,
    source: Option<Source>,
    transformers: Vec<Box<dyn Transformer>>,
    serializer: Option<Box<dyn Serializer>>,
    branch_sensitive: bool,
    prepared: bool,
    output: OutputMode,
}

impl ProcessingPipeline {
    pub fn new(output: OutputMode) -> Self {
        Self {
            state: PipelineState::Empty,
            source: None,
            transformers: Vec::new(),
            serializer: None,
            branch_sensitive: false,
            prepared: false,
            output,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output
    }

    pub fn set_generator(&mut self, generator: Box<dyn Generator>) -> Result<(), InvalidPipelineError> {
        if self.state != PipelineState::Empty {
            return Err(InvalidPipelineError::new("set generator", self.state));
        }
        self.source = Some(Source::Generator(generator));
        self.state = PipelineState::HasGenerator;
        Ok(())
    }

    /// A reader produces the whole body, so setting one seals the pipeline.
    pub fn set_reader(&mut self, reader: Box<dyn Reader>) -> Result<(), InvalidPipelineError> {
        if self.state != PipelineState::Empty {
            return Err(InvalidPipelineError::new("set reader", self.state));
        }
        self.source = Some(Source::Reader(reader));
        self.state = PipelineState::Sealed;
        Ok(())
    }

    pub fn add_transformer(&mut self, transformer: Box<dyn Transformer>) -> Result<(), InvalidPipelineError> {
        match self.state {
            PipelineState::HasGenerator | PipelineState::HasTransformers => {
                self.transformers.push(transformer);
                self.state = PipelineState::HasTransformers;
                Ok(())
            }
            state => Err(InvalidPipelineError::new("add transformer", state)),
        }
    }

    pub fn set_serializer(&mut self, serializer: Box<dyn Serializer>) -> Result<(), InvalidPipelineError> {
        match self.state {
            PipelineState::HasGenerator | PipelineState::HasTransformers => {
                self.serializer = Some(serializer);
                self.state = PipelineState::Sealed;
                Ok(())
            }
            state => Err(InvalidPipelineError::new("set serializer", state)),
        }
    }

    /// Mark the pipeline as reached through a branch. Affects cache keys only.
    pub fn inform_branch_point(&mut self) {
        self.branch_sensitive = true;
    }

    pub fn is_branch_sensitive(&self) -> bool {
        self.branch_sensitive
    }

    /// MIME type of the output, once a serializer or reader is set.
    pub fn mime_type(&self) -> Option<&str> {
        match (&self.source, &self.serializer) {
            (Some(Source::Reader(reader)), _) => Some(reader.mime_type()),
            (_, Some(serializer)) => Some(serializer.mime_type()),
            _ => None,
        }
    }

    /// Aggregate validity of every stage. `None` if any stage is uncacheable.
    pub fn validity(&self) -> Option<ValidityDescriptor> {
        let source = match &self.source {
            Some(Source::Generator(generator)) => generator.validity(),
            Some(Source::Reader(reader)) => reader.validity(),
            None => return None,
        };
        let stages = self.transformers.iter().map(|t| t.validity());
        let serializer = self.serializer.iter().map(|s| s.validity());

        ValidityDescriptor::aggregate(std::iter::once(source).chain(stages).chain(serializer))
    }

    /// Key material contributed by the stages, in chain order.
    pub fn cache_key_material(&self) -> Vec<String> {
        let source = match &self.source {
            Some(Source::Generator(generator)) => generator.cache_key(),
            Some(Source::Reader(reader)) => reader.cache_key(),
            None => None,
        };
        std::iter::once(source)
            .chain(self.transformers.iter().map(|t| t.cache_key()))
            .chain(self.serializer.iter().map(|s| s.cache_key()))
            .flatten()
            .collect()
    }

    /// Hand the request context to every stage. Runs at most once.
    pub fn setup(&mut self, ctx: &ProcessingContext) -> Result<(), PipelineError> {
        if self.prepared {
            return Ok(());
        }
        match &mut self.source {
            Some(Source::Generator(generator)) => generator.setup(ctx)?,
            Some(Source::Reader(reader)) => reader.setup(ctx)?,
            None => return Err(InvalidPipelineError::new("set up", self.state).into()),
        }
        for transformer in &mut self.transformers {
            transformer.setup(ctx)?;
        }
        if let Some(serializer) = &mut self.serializer {
            serializer.setup(ctx)?;
        }
        self.prepared = true;
        Ok(())
    }

    /// Run the sealed pipeline into `out`, honoring the output mode.
    pub fn process(&mut self, ctx: &ProcessingContext, out: &mut dyn Write) -> Result<ProcessOutcome, PipelineError> {
        if self.state != PipelineState::Sealed {
            return Err(InvalidPipelineError::new("process", self.state).into());
        }
        self.setup(ctx)?;

        match self.output {
            OutputMode::Streaming => {
                let mut counting = CountingWriter::new(out);
                self.run(&mut counting)?;
                counting.flush()?;
                Ok(ProcessOutcome {
                    content_length: None,
                    bytes_written: counting.written,
                })
            }
            OutputMode::Buffered => {
                let buffer = self.run_to_buffer()?;
                let length = buffer.len() as u64;
                out.write_all(&buffer)?;
                out.flush()?;
                Ok(ProcessOutcome {
                    content_length: Some(length),
                    bytes_written: length,
                })
            }
        }
    }

    /// Run the sealed pipeline and return the whole body.
    pub fn process_to_bytes(&mut self, ctx: &ProcessingContext) -> Result<Vec<u8>, PipelineError> {
        if self.state != PipelineState::Sealed {
            return Err(InvalidPipelineError::new("process", self.state).into());
        }
        self.setup(ctx)?;
        self.run_to_buffer()
    }

    /// Drive generator events through the transformers into `consumer`
    /// instead of a serializer. The pipeline must not be sealed.
    pub fn process_to(&mut self, ctx: &ProcessingContext, consumer: &mut dyn EventConsumer) -> Result<(), PipelineError> {
        if !matches!(self.state, PipelineState::HasGenerator | PipelineState::HasTransformers) {
            return Err(InvalidPipelineError::new("process to a consumer", self.state).into());
        }
        self.setup(ctx)?;

        let Some(Source::Generator(generator)) = &mut self.source else {
            return Err(InvalidPipelineError::new("process to a consumer", self.state).into());
        };
        let mut chain = Link {
            stages: &mut self.transformers,
            sink: consumer,
        };
        generator.generate(&mut chain)?;
        Ok(())
    }

    fn run_to_buffer(&mut self) -> Result<Vec<u8>, PipelineError> {
        let mut buffer = Vec::new();
        self.run(&mut buffer)?;
        Ok(buffer)
    }

    fn run(&mut self, out: &mut dyn Write) -> Result<(), PipelineError> {
        match &mut self.source {
            Some(Source::Reader(reader)) => {
                reader.read(out)?;
            }
            Some(Source::Generator(generator)) => {
                let Some(serializer) = self.serializer.as_mut() else {
                    return Err(InvalidPipelineError::new("process", self.state).into());
                };
                let mut sink = SerializerSink {
                    serializer: &mut **serializer,
                    out,
                };
                let mut chain = Link {
                    stages: &mut self.transformers,
                    sink: &mut sink,
                };
                generator.generate(&mut chain)?;
            }
            None => return Err(InvalidPipelineError::new("process", self.state).into()),
        }
        Ok(())
    }
}

/// One position in the transformer chain.
struct Link<'a, 's> {
    stages: &'a mut [Box<dyn Transformer>],
    sink: &'a mut (dyn EventConsumer + 's),
}

impl EventConsumer for Link<'_, '_> {
    fn consume(&mut self, event: PipelineEvent) -> Result<(), StageError> {
        match self.stages.split_first_mut() {
            Some((stage, rest)) => {
                let mut next = Link {
                    stages: rest,
                    sink: &mut *self.sink,
                };
                stage.transform(event, &mut next)
            }
            None => self.sink.consume(event),
        }
    }
}

struct SerializerSink<'a> {
    serializer: &'a mut dyn Serializer,
    out: &'a mut dyn Write,
}

impl EventConsumer for SerializerSink<'_> {
    fn consume(&mut self, event: PipelineEvent) -> Result<(), StageError> {
        self.serializer.serialize(event, &mut *self.out)
    }
}

struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl<'a> CountingWriter<'a> {
    fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, written: 0 }
    }
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::builtin::{MarkupSerializer, StaticGenerator, SubstituteTransformer, TextSerializer};
    use crate::routing::pattern::Captures;
    use std::collections::BTreeMap;

    fn ctx() -> ProcessingContext {
        ProcessingContext::new("/hello", Captures::new("hello", Vec::new()), BTreeMap::new())
    }

    fn generator(text: &str) -> Box<dyn Generator> {
        Box::new(StaticGenerator::new("page", text))
    }

    struct Uncacheable;

    impl Transformer for Uncacheable {
        fn transform(&mut self, event: PipelineEvent, out: &mut dyn EventConsumer) -> Result<(), StageError> {
            out.consume(event)
        }

        fn validity(&self) -> Option<ValidityDescriptor> {
            None
        }
    }

    struct Failing;

    impl Transformer for Failing {
        fn transform(&mut self, event: PipelineEvent, out: &mut dyn EventConsumer) -> Result<(), StageError> {
            if matches!(event, PipelineEvent::Text(_)) {
                return Err(StageError::new("failing", "boom"));
            }
            out.consume(event)
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Streaming);
        assert_eq!(pipeline.state(), PipelineState::Empty);

        pipeline.set_generator(generator("hi")).unwrap();
        assert_eq!(pipeline.state(), PipelineState::HasGenerator);

        pipeline.add_transformer(Box::new(SubstituteTransformer::new("h", "H"))).unwrap();
        pipeline.add_transformer(Box::new(SubstituteTransformer::new("i", "I"))).unwrap();
        assert_eq!(pipeline.state(), PipelineState::HasTransformers);

        pipeline.set_serializer(Box::new(TextSerializer)).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Sealed);
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Streaming);
        let err = pipeline.set_serializer(Box::new(TextSerializer)).unwrap_err();
        assert_eq!(err.state, PipelineState::Empty);
        assert!(pipeline.add_transformer(Box::new(SubstituteTransformer::new("a", "b"))).is_err());

        pipeline.set_generator(generator("hi")).unwrap();
        assert!(pipeline.set_generator(generator("again")).is_err());

        pipeline.set_serializer(Box::new(TextSerializer)).unwrap();
        let err = pipeline.set_serializer(Box::new(TextSerializer)).unwrap_err();
        assert_eq!(err.state, PipelineState::Sealed);
        assert!(pipeline.add_transformer(Box::new(SubstituteTransformer::new("a", "b"))).is_err());
    }

    #[test]
    fn test_process_requires_sealed() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Streaming);
        pipeline.set_generator(generator("hi")).unwrap();

        let mut out = Vec::new();
        let err = pipeline.process(&ctx(), &mut out).unwrap_err();
        assert!(matches!(err, PipelineError::Invalid(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_process_streaming() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Streaming);
        pipeline.set_generator(generator("hello world")).unwrap();
        pipeline.add_transformer(Box::new(SubstituteTransformer::new("world", "there"))).unwrap();
        pipeline.set_serializer(Box::new(TextSerializer)).unwrap();

        let mut out = Vec::new();
        let outcome = pipeline.process(&ctx(), &mut out).unwrap();
        assert_eq!(out, b"hello there");
        assert_eq!(outcome.content_length, None);
        assert_eq!(outcome.bytes_written, 11);
        assert_eq!(pipeline.mime_type(), Some("text/plain"));
    }

    #[test]
    fn test_process_buffered_reports_length() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Buffered);
        pipeline.set_generator(generator("a < b")).unwrap();
        pipeline.set_serializer(Box::new(MarkupSerializer)).unwrap();

        let mut out = Vec::new();
        let outcome = pipeline.process(&ctx(), &mut out).unwrap();
        let body = String::from_utf8(out).unwrap();
        assert!(body.ends_with("<page>a &lt; b</page>"));
        assert_eq!(outcome.content_length, Some(body.len() as u64));
    }

    #[test]
    fn test_buffered_failure_writes_nothing() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Buffered);
        pipeline.set_generator(generator("text")).unwrap();
        pipeline.add_transformer(Box::new(Failing)).unwrap();
        pipeline.set_serializer(Box::new(MarkupSerializer)).unwrap();

        let mut out = Vec::new();
        let err = pipeline.process(&ctx(), &mut out).unwrap_err();
        assert!(matches!(err, PipelineError::Stage(ref e) if e.stage == "failing"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_process_to_consumer() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Streaming);
        pipeline.set_generator(generator("x")).unwrap();
        pipeline.add_transformer(Box::new(SubstituteTransformer::new("x", "y"))).unwrap();

        let mut events: Vec<PipelineEvent> = Vec::new();
        pipeline.process_to(&ctx(), &mut events).unwrap();
        assert_eq!(
            events,
            vec![
                PipelineEvent::StartDocument,
                PipelineEvent::start("page"),
                PipelineEvent::text("y"),
                PipelineEvent::end("page"),
                PipelineEvent::EndDocument,
            ]
        );

        pipeline.set_serializer(Box::new(TextSerializer)).unwrap();
        assert!(pipeline.process_to(&ctx(), &mut events).is_err());
    }

    #[test]
    fn test_validity_aggregates_stages() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Streaming);
        assert_eq!(pipeline.validity(), None);

        pipeline.set_generator(generator("x")).unwrap();
        pipeline.set_serializer(Box::new(TextSerializer)).unwrap();
        assert_eq!(
            pipeline.validity(),
            Some(ValidityDescriptor::Aggregate(vec![
                ValidityDescriptor::Always,
                ValidityDescriptor::Always,
            ]))
        );
        assert_eq!(pipeline.cache_key_material().len(), 1);

        let mut uncacheable = ProcessingPipeline::new(OutputMode::Streaming);
        uncacheable.set_generator(generator("x")).unwrap();
        uncacheable.add_transformer(Box::new(Uncacheable)).unwrap();
        uncacheable.set_serializer(Box::new(TextSerializer)).unwrap();
        assert_eq!(uncacheable.validity(), None);
    }

    #[test]
    fn test_branch_point_only_marks() {
        let mut pipeline = ProcessingPipeline::new(OutputMode::Streaming);
        assert!(!pipeline.is_branch_sensitive());
        pipeline.inform_branch_point();
        assert!(pipeline.is_branch_sensitive());
        assert_eq!(pipeline.state(), PipelineState::Empty);
    }
}
