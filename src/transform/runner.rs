//! Operator driving
//!
//! [`TransformerRunner`] freezes the negotiated output shape of one operator
//! and allocates its output chunks. [`TransformerChain`] drives a linear
//! sequence of single-input operators, each feeding the next.

use super::Transformer;
use crate::error::{Result, SigstreamError};
use crate::stream::{Stream, StreamShape};

/// Owns one operator and its frozen output shape
pub struct TransformerRunner {
    transformer: Box<dyn Transformer>,
    input_shapes: Vec<StreamShape>,
    output_shape: Option<StreamShape>,
    entered: bool,
}

impl TransformerRunner {
    pub fn new(transformer: Box<dyn Transformer>) -> Self {
        Self {
            transformer,
            input_shapes: Vec::new(),
            output_shape: None,
            entered: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.transformer.name()
    }

    /// Negotiate the output shape once; later calls return the frozen shape
    pub fn setup(&mut self, inputs: &[StreamShape]) -> Result<StreamShape> {
        if let Some(shape) = &self.output_shape {
            return Ok(shape.clone());
        }
        let shape = self.transformer.negotiate(inputs).map_err(|e| {
            log::error!("[RUNNER] {} rejected its inputs: {}", self.name(), e);
            e
        })?;
        log::debug!(
            "[RUNNER] {} negotiated dim={} type={} sr={}",
            self.name(),
            shape.dim,
            shape.sample_type,
            shape.sr
        );
        self.input_shapes = inputs.to_vec();
        self.output_shape = Some(shape.clone());
        Ok(shape)
    }

    /// Frozen output shape, if negotiated
    pub fn output_shape(&self) -> Option<&StreamShape> {
        self.output_shape.as_ref()
    }

    /// Run one chunk through the operator
    ///
    /// The first call enters the operator. Inputs must keep the element kind
    /// and dimension they were negotiated with; the sample count may vary.
    pub fn process(&mut self, inputs: &[&Stream]) -> Result<Stream> {
        let frozen = match &self.output_shape {
            Some(shape) => shape.clone(),
            None => {
                let shapes: Vec<StreamShape> = inputs.iter().map(|s| s.shape()).collect();
                self.setup(&shapes)?
            }
        };

        if inputs.len() != self.input_shapes.len() {
            return Err(SigstreamError::ShapeMismatch {
                component: self.name().to_string(),
                reason: format!(
                    "{} inputs given, {} negotiated",
                    inputs.len(),
                    self.input_shapes.len()
                ),
            });
        }
        for (input, expected) in inputs.iter().zip(&self.input_shapes) {
            if input.dim() != expected.dim || input.sample_type() != expected.sample_type {
                log::error!(
                    "[RUNNER] {} received {}x{} chunk, negotiated {}x{}",
                    self.name(),
                    input.dim(),
                    input.sample_type(),
                    expected.dim,
                    expected.sample_type
                );
                return Err(SigstreamError::ShapeMismatch {
                    component: self.name().to_string(),
                    reason: format!(
                        "input changed from dim {} {} to dim {} {}",
                        expected.dim,
                        expected.sample_type,
                        input.dim(),
                        input.sample_type()
                    ),
                });
            }
        }

        if !self.entered {
            self.transformer.enter(inputs, &frozen)?;
            self.entered = true;
        }

        let shapes: Vec<StreamShape> = inputs.iter().map(|s| s.shape()).collect();
        let mut shape = frozen;
        shape.num = self.transformer.output_num(&shapes)?;
        let time = inputs.first().map(|s| s.time()).unwrap_or(0.0);
        let mut output = Stream::from_shape(&shape, time);

        self.transformer.transform(inputs, &mut output)?;
        Ok(output)
    }

    /// Release operator history; the negotiated shape stays frozen
    pub fn flush(&mut self) {
        if self.entered {
            self.transformer.flush();
            self.entered = false;
        }
    }
}

/// Linear chain of single-input operators
///
/// Operators run in insertion order (index 0 first).
#[derive(Default)]
pub struct TransformerChain {
    runners: Vec<TransformerRunner>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operator to the end of the chain
    pub fn add(&mut self, transformer: Box<dyn Transformer>) -> &mut Self {
        self.runners.push(TransformerRunner::new(transformer));
        self
    }

    /// Negotiate every stage; returns the shape leaving the last one
    pub fn setup(&mut self, input: &StreamShape) -> Result<StreamShape> {
        let mut shape = input.clone();
        for runner in &mut self.runners {
            shape = runner.setup(std::slice::from_ref(&shape))?;
        }
        Ok(shape)
    }

    /// Push one chunk through every stage
    pub fn process(&mut self, input: &Stream) -> Result<Stream> {
        let mut current = input.clone();
        for runner in &mut self.runners {
            current = runner.process(&[&current])?;
        }
        Ok(current)
    }

    pub fn flush(&mut self) {
        for runner in &mut self.runners {
            runner.flush();
        }
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Operator names in processing order
    pub fn names(&self) -> Vec<&'static str> {
        self.runners.iter().map(|r| r.name()).collect()
    }
}
