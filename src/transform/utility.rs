//! Channel plumbing operators: merge, select and serialize
//!
//! These work on any numeric element kind through the kind-agnostic stream
//! accessors.

use super::{primary, primary_stream, Transformer};
use crate::error::{Result, SigstreamError};
use crate::stream::{SampleType, Stream, StreamShape};

fn require_numeric(component: &str, shape: &StreamShape) -> Result<()> {
    if shape.sample_type.is_numeric() {
        Ok(())
    } else {
        Err(SigstreamError::UnsupportedType {
            component: component.to_string(),
            expected: "numeric element kind".to_string(),
            found: shape.sample_type.to_string(),
        })
    }
}

fn copy_values(input: &Stream, output: &mut Stream) -> Result<()> {
    let mut values = Vec::with_capacity(input.total());
    input.copy_to_f64(&mut values)?;
    output.copy_from_f64(&values)
}

// ============================================================================
// Merge
// ============================================================================

/// Concatenates the channels of several inputs sharing num and sample rate
///
/// The output is DOUBLE if any input is DOUBLE, FLOAT otherwise.
#[derive(Debug, Clone, Default)]
pub struct Merge {
    offsets: Vec<usize>,
}

impl Merge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check shapes agree and return the merged width
    pub fn merged_dim(component: &str, inputs: &[StreamShape]) -> Result<usize> {
        let first = primary(component, inputs)?;
        for shape in inputs {
            require_numeric(component, shape)?;
            if shape.num != first.num || shape.sr != first.sr {
                log::error!(
                    "[MERGE] cannot merge {} samples at {} Hz with {} samples at {} Hz",
                    shape.num,
                    shape.sr,
                    first.num,
                    first.sr
                );
                return Err(SigstreamError::ShapeMismatch {
                    component: component.to_string(),
                    reason: format!(
                        "inputs differ in num or sample rate ({}@{} vs {}@{})",
                        shape.num, shape.sr, first.num, first.sr
                    ),
                });
            }
        }
        Ok(inputs.iter().map(|s| s.dim).sum())
    }

    /// Element kind of the merged stream
    pub fn merged_type(inputs: &[StreamShape]) -> SampleType {
        if inputs.iter().any(|s| s.sample_type == SampleType::Double) {
            SampleType::Double
        } else {
            SampleType::Float
        }
    }

    /// Merge chunks directly, outside a runner
    pub fn merge_streams(inputs: &[&Stream]) -> Result<Stream> {
        let shapes: Vec<StreamShape> = inputs.iter().map(|s| s.shape()).collect();
        let dim = Self::merged_dim("merge", &shapes)?;
        let first = primary_stream("merge", inputs)?;
        let mut out = Stream::new(
            first.num(),
            dim,
            first.sr(),
            first.time(),
            Self::merged_type(&shapes),
        );
        let mut merge = Merge::new();
        merge.enter(inputs, &out.shape())?;
        merge.transform(inputs, &mut out)?;
        Ok(out)
    }
}

impl Transformer for Merge {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        Self::merged_dim(self.name(), inputs)
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        Ok(Self::merged_type(inputs))
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        self.offsets = inputs
            .iter()
            .scan(0, |offset, s| {
                let start = *offset;
                *offset += s.dim();
                Some(start)
            })
            .collect();
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let out_dim = output.dim();
        for (input, &offset) in inputs.iter().zip(&self.offsets) {
            if input.num() != output.num() {
                return Err(SigstreamError::ShapeMismatch {
                    component: self.name().to_string(),
                    reason: format!("{} samples merged into {}", input.num(), output.num()),
                });
            }
            let dim = input.dim();
            for i in 0..input.num() {
                for j in 0..dim {
                    let value = input.value(i * dim + j).unwrap_or(0.0);
                    output.set_value(i * out_dim + offset + j, value)?;
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.offsets.clear();
    }
}

// ============================================================================
// Selector
// ============================================================================

/// Gathers a configured subset of channels, in the configured order
#[derive(Debug, Clone)]
pub struct Selector {
    indices: Vec<usize>,
}

impl Selector {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn check(&self, dim: usize) -> Result<()> {
        if self.indices.is_empty() {
            return Err(super::invalid("select", "[]", "at least one channel index"));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i >= dim) {
            log::error!("[SELECTOR] channel {} out of range for dim {}", bad, dim);
            return Err(SigstreamError::ShapeMismatch {
                component: self.name().to_string(),
                reason: format!("channel {} out of range for dim {}", bad, dim),
            });
        }
        Ok(())
    }
}

impl Transformer for Selector {
    fn name(&self) -> &'static str {
        "selector"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        self.check(primary(self.name(), inputs)?.dim)?;
        Ok(self.indices.len())
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        let input = primary(self.name(), inputs)?;
        require_numeric(self.name(), input)?;
        Ok(input.sample_type)
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        self.check(primary_stream(self.name(), inputs)?.dim())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let selected = input.select(&self.indices)?;
        copy_values(&selected, output)?;
        output.set_labels(selected.labels().to_vec())
    }

    fn flush(&mut self) {}
}

// ============================================================================
// Serializer
// ============================================================================

/// Flattens every chunk into a single sample of `num * dim` channels
///
/// The chunk size is fixed by negotiation.
#[derive(Debug, Clone, Default)]
pub struct Serializer;

impl Serializer {
    pub fn new() -> Self {
        Self
    }
}

impl Transformer for Serializer {
    fn name(&self) -> &'static str {
        "serializer"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        let input = primary(self.name(), inputs)?;
        Ok(input.num * input.dim)
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        let input = primary(self.name(), inputs)?;
        require_numeric(self.name(), input)?;
        Ok(input.sample_type)
    }

    fn output_num(&self, _inputs: &[StreamShape]) -> Result<usize> {
        Ok(1)
    }

    fn enter(&mut self, _inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        if input.total() != output.dim() {
            return Err(SigstreamError::ShapeMismatch {
                component: self.name().to_string(),
                reason: format!(
                    "chunk of {} elements, negotiated {}",
                    input.total(),
                    output.dim()
                ),
            });
        }
        copy_values(input, output)
    }

    fn flush(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformerRunner;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge_mixed_types() {
        let a = Stream::from_f32(vec![1.0, 2.0], 1, 10.0, 0.0).unwrap();
        let b = Stream::from_f64(vec![3.0, 4.0, 5.0, 6.0], 2, 10.0, 0.0).unwrap();
        let merged = Merge::merge_streams(&[&a, &b]).unwrap();
        assert_eq!(merged.sample_type(), SampleType::Double);
        assert_eq!(merged.as_f64().unwrap(), &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_merge_integer_inputs_become_float() {
        let mut a = Stream::new(1, 1, 10.0, 0.0, SampleType::Int);
        a.set_value(0, 7.0).unwrap();
        let b = Stream::from_f32(vec![0.5], 1, 10.0, 0.0).unwrap();
        let merged = Merge::merge_streams(&[&a, &b]).unwrap();
        assert_eq!(merged.as_f32().unwrap(), &[7.0, 0.5]);
    }

    #[test]
    fn test_merge_rejects_rate_mismatch() {
        let a = Stream::from_f32(vec![1.0], 1, 10.0, 0.0).unwrap();
        let b = Stream::from_f32(vec![1.0], 1, 20.0, 0.0).unwrap();
        assert!(Merge::merge_streams(&[&a, &b]).is_err());
    }

    #[test]
    fn test_selector_out_of_range_is_configuration_fault() {
        let selector = Selector::new(vec![0, 5]);
        let err = selector
            .negotiate(&[StreamShape::new(1, 3, 1.0, SampleType::Float)])
            .unwrap_err();
        assert!(err.is_configuration_fault());
    }

    #[test]
    fn test_serializer() {
        let mut runner = TransformerRunner::new(Box::new(Serializer::new()));
        let shape = runner
            .setup(&[StreamShape::new(3, 2, 30.0, SampleType::Float)])
            .unwrap();
        assert_eq!((shape.num, shape.dim), (1, 6));
        assert_eq!(shape.sr, 10.0);

        let chunk = Stream::from_f32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 30.0, 0.0).unwrap();
        let out = runner.process(&[&chunk]).unwrap();
        assert_eq!(out.as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let short = Stream::from_f32(vec![1.0, 2.0], 2, 30.0, 0.0).unwrap();
        assert!(runner.process(&[&short]).is_err());
    }
}
