//! Pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! RouteMatch + request parameters
//!     → factory.rs (resolve {N}/{name} parameters, instantiate components)
//!     → assembler.rs (Empty → HasGenerator → HasTransformers → Sealed)
//!     → process():
//!         generator.generate()
//!         → transformer → transformer → ... (push-style events)
//!         → serializer → output bytes
//!       or reader.read() → output bytes
//!
//! Output modes:
//!     Streaming  bytes go straight to the output
//!     Buffered   bytes are materialized first so the length is known
//! ```
//!
//! # Design Decisions
//! - A pipeline lives for one request and is never shared
//! - Ordering violations are configuration errors, surfaced immediately
//! - Components are resolved through an injected factory, not global lookup

pub mod assembler;
pub mod builtin;
pub mod component;
pub mod factory;

pub use assembler::{InvalidPipelineError, PipelineError, PipelineState, ProcessOutcome, ProcessingPipeline};
pub use component::{
    EventConsumer, Generator, PipelineEvent, ProcessingContext, Reader, Serializer, StageError, Transformer,
};
pub use factory::{build_pipeline, ComponentFactory, ComponentRegistry, FactoryError};
