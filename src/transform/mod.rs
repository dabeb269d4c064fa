//! Stateful stream operators
//!
//! Every operator implements [`Transformer`]. Output shape is negotiated from
//! the input shapes before any data flows and stays fixed for the run. State
//! that must survive between chunks lives in the operator struct, so running
//! a stream split into chunks of sizes `(a, b)` gives the same output as a
//! single chunk of `a + b` samples. Spectral operators additionally require
//! every chunk to be a multiple of their hop; see [`SpectralOptions`].

pub mod derivative;
pub mod envelope;
pub mod iir;
pub mod moving_average;
pub mod moving_minmax;
pub mod normalize;
pub mod runner;
pub mod spectral;
pub mod utility;

pub use derivative::{Derivative, DerivativeOptions, DerivativeSet};
pub use envelope::{Envelope, EnvelopeOptions};
pub use iir::{Butfilt, ButfiltOptions, Iir};
pub use moving_average::{AvgVarFormat, MovingMethod, MvgAvgVar, MvgAvgVarOptions};
pub use moving_minmax::{MinMaxFormat, MvgMinMax, MvgMinMaxOptions};
pub use normalize::{Normalize, NormalizeMethod, NormalizeOptions};
pub use runner::{TransformerChain, TransformerRunner};
pub use spectral::{
    FeatureSet, FftTransform, Psd, PsdOptions, SpectralFeatures, SpectralFeaturesOptions,
    SpectralOptions, Spectrogram, SpectrogramOptions,
};
pub use utility::{Merge, Selector, Serializer};

use crate::error::{Result, SigstreamError};
use crate::stream::{SampleType, Stream, StreamShape};

/// Base trait for all stream operators
///
/// The `output_*` methods must be pure functions of configuration and input
/// shapes. They are called once by [`TransformerRunner::setup`] and the result
/// is frozen; only `output_num` is re-evaluated per chunk because chunk sizes
/// may vary.
pub trait Transformer: Send {
    /// Operator identifier used in logs and errors
    fn name(&self) -> &'static str;

    /// Output channels per sample
    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize>;

    /// Output element kind
    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType>;

    /// Output element width in bytes
    fn output_bytes(&self, inputs: &[StreamShape]) -> Result<usize> {
        let sample_type = self.output_type(inputs)?;
        sample_type.size().ok_or_else(|| SigstreamError::UnsupportedType {
            component: self.name().to_string(),
            expected: "built-in element kind".to_string(),
            found: sample_type.to_string(),
        })
    }

    /// Output samples produced for an input chunk of this shape
    fn output_num(&self, inputs: &[StreamShape]) -> Result<usize> {
        Ok(primary(self.name(), inputs)?.num)
    }

    /// Allocate history from configuration and the first observed input
    fn enter(&mut self, inputs: &[&Stream], output: &StreamShape) -> Result<()>;

    /// Consume one chunk per input and fill `output`
    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()>;

    /// Release history; safe to call repeatedly and before any data
    fn flush(&mut self);

    /// Compose the output shape; sample rate scales with the num ratio
    fn negotiate(&self, inputs: &[StreamShape]) -> Result<StreamShape> {
        let input = primary(self.name(), inputs)?;
        let num = self.output_num(inputs)?;
        let sr = if input.num > 0 {
            input.sr * num as f64 / input.num as f64
        } else {
            input.sr
        };
        Ok(StreamShape {
            num,
            dim: self.output_dim(inputs)?,
            bytes: self.output_bytes(inputs)?,
            sample_type: self.output_type(inputs)?,
            sr,
        })
    }
}

// ============================================================================
// Helpers shared by operators
// ============================================================================

/// First input shape, or a shape error if there is none
pub(crate) fn primary<'a>(component: &str, inputs: &'a [StreamShape]) -> Result<&'a StreamShape> {
    inputs.first().ok_or_else(|| SigstreamError::ShapeMismatch {
        component: component.to_string(),
        reason: "no input stream".to_string(),
    })
}

/// First input chunk, or a shape error if there is none
pub(crate) fn primary_stream<'a>(component: &str, inputs: &[&'a Stream]) -> Result<&'a Stream> {
    inputs
        .first()
        .copied()
        .ok_or_else(|| SigstreamError::ShapeMismatch {
            component: component.to_string(),
            reason: "no input stream".to_string(),
        })
}

/// Reject anything but FLOAT and DOUBLE
pub(crate) fn require_floating(component: &str, shape: &StreamShape) -> Result<SampleType> {
    if shape.sample_type.is_floating() {
        Ok(shape.sample_type)
    } else {
        log::error!(
            "[{}] unsupported element kind {}",
            component.to_uppercase(),
            shape.sample_type
        );
        Err(SigstreamError::UnsupportedType {
            component: component.to_string(),
            expected: "FLOAT or DOUBLE".to_string(),
            found: shape.sample_type.to_string(),
        })
    }
}

/// Error for a parameter outside its valid range
pub(crate) fn invalid(param: &str, value: impl ToString, expected: &str) -> SigstreamError {
    SigstreamError::InvalidParameter {
        param: param.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

/// Window length in samples: `round(window * sr)`, at least one
pub(crate) fn window_samples(window: f64, sr: f64) -> usize {
    let n = (window * sr).round();
    if n >= 1.0 {
        n as usize
    } else {
        1
    }
}

/// Decay constant of an exponential estimate spanning `n` samples
#[inline]
pub(crate) fn decay_alpha(n: usize) -> f64 {
    2.0 / (n as f64 + 1.0)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Run `op` over `values` (dim channels) split into the given chunk sizes
    pub fn run_chunked(
        op: Box<dyn Transformer>,
        values: &[f64],
        dim: usize,
        sr: f64,
        chunks: &[usize],
    ) -> Vec<f64> {
        let mut runner = TransformerRunner::new(op);
        let first = chunks[0];
        runner
            .setup(&[StreamShape::new(first, dim, sr, SampleType::Double)])
            .unwrap();

        let mut out = Vec::new();
        let mut offset = 0;
        for &n in chunks {
            let chunk = values[offset * dim..(offset + n) * dim].to_vec();
            let stream = Stream::from_f64(chunk, dim, sr, offset as f64 / sr).unwrap();
            let result = runner.process(&[&stream]).unwrap();
            let mut buf = Vec::new();
            result.copy_to_f64(&mut buf).unwrap();
            out.extend(buf);
            offset += n;
        }
        runner.flush();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_samples() {
        assert_eq!(window_samples(0.5, 100.0), 50);
        assert_eq!(window_samples(0.0, 100.0), 1);
    }

    #[test]
    fn test_require_floating() {
        let shape = StreamShape::new(1, 1, 1.0, SampleType::Int);
        assert!(require_floating("iir", &shape).is_err());
        let shape = StreamShape::new(1, 1, 1.0, SampleType::Float);
        assert_eq!(require_floating("iir", &shape).unwrap(), SampleType::Float);
    }
}
