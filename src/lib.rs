//! Sigstream - Streaming Signal Transforms and Model Inference
//!
//! Sigstream processes chunked, timestamped, multi-channel sensor streams
//! through stateful operators and feeds the result to trained classifiers.
//!
//! # Architecture
//!
//! - [`stream`]: typed sample buffers and chunked providers
//! - [`filter`]: Butterworth design, window functions and filterbanks
//! - [`transform`]: the operator contract and the stateful DSP operators;
//!   every operator yields identical results however its input is chunked
//! - [`model`]: model kinds, descriptor files and the registry that lets
//!   several consumers share one asynchronously loaded model
//! - [`consumer`]: classification and training stages emitting events

pub mod cli;
pub mod consumer;
pub mod error;
pub mod filter;
pub mod math;
pub mod model;
pub mod options;
pub mod stream;
pub mod transform;

pub use consumer::{Classifier, Consumer, Event, Trainer};
pub use error::{Result, SigstreamError};
pub use model::{Model, ModelDescriptor, ModelKind, ModelRegistry};
pub use stream::{SampleType, Stream, StreamShape};
pub use transform::{Transformer, TransformerChain, TransformerRunner};
