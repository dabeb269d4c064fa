//! Per-channel normalisation with fixed parameters

use super::{invalid, primary, primary_stream, require_floating, Transformer};
use crate::error::{Result, SigstreamError};
use crate::math::mean_and_variance;
use crate::stream::{SampleType, Stream, StreamShape};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMethod {
    /// Map `[min, max]` onto `[low, high]`
    #[default]
    MinMax,
    /// Subtract mean, divide by standard deviation
    ZScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    pub method: NormalizeMethod,
    /// Per-channel minimum (min-max)
    pub min: Vec<f64>,
    /// Per-channel maximum (min-max)
    pub max: Vec<f64>,
    /// Per-channel mean (z-score)
    pub mean: Vec<f64>,
    /// Per-channel standard deviation (z-score)
    pub std: Vec<f64>,
    /// Target range for min-max
    pub low: f64,
    pub high: f64,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            method: NormalizeMethod::MinMax,
            min: Vec::new(),
            max: Vec::new(),
            mean: Vec::new(),
            std: Vec::new(),
            low: 0.0,
            high: 1.0,
        }
    }
}

impl NormalizeOptions {
    /// Estimate parameters for `method` from a recorded stream
    pub fn fit(stream: &Stream, method: NormalizeMethod) -> Result<Self> {
        let dim = stream.dim();
        let mut values = Vec::new();
        stream.copy_to_f64(&mut values)?;
        let mut options = Self {
            method,
            ..Default::default()
        };
        for ch in 0..dim {
            let column: Vec<f64> = values
                .iter()
                .skip(ch)
                .step_by(dim)
                .copied()
                .filter(|v| v.is_finite())
                .collect();
            match method {
                NormalizeMethod::MinMax => {
                    let min = column.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    options.min.push(if min.is_finite() { min } else { 0.0 });
                    options.max.push(if max.is_finite() { max } else { 0.0 });
                }
                NormalizeMethod::ZScore => {
                    let (mean, variance) = mean_and_variance(&column);
                    options.mean.push(mean);
                    options.std.push(variance.sqrt());
                }
            }
        }
        Ok(options)
    }

    fn parameter_len(&self) -> (usize, usize) {
        match self.method {
            NormalizeMethod::MinMax => (self.min.len(), self.max.len()),
            NormalizeMethod::ZScore => (self.mean.len(), self.std.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Normalize {
    options: NormalizeOptions,
    scratch: Vec<f64>,
}

impl Normalize {
    pub fn new(options: NormalizeOptions) -> Self {
        Self {
            options,
            scratch: Vec::new(),
        }
    }

    #[inline]
    fn apply(&self, ch: usize, x: f64) -> f64 {
        let o = &self.options;
        match o.method {
            NormalizeMethod::MinMax => {
                let range = o.max[ch] - o.min[ch];
                if range == 0.0 {
                    o.low
                } else {
                    o.low + (x - o.min[ch]) / range * (o.high - o.low)
                }
            }
            NormalizeMethod::ZScore => {
                if o.std[ch] == 0.0 {
                    0.0
                } else {
                    (x - o.mean[ch]) / o.std[ch]
                }
            }
        }
    }
}

impl Transformer for Normalize {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        Ok(primary(self.name(), inputs)?.dim)
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        require_floating(self.name(), primary(self.name(), inputs)?)
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let (a, b) = self.options.parameter_len();
        if a != input.dim() || b != input.dim() {
            log::error!(
                "[NORMALIZE] {} parameters for {} channels",
                a.min(b),
                input.dim()
            );
            return Err(SigstreamError::ShapeMismatch {
                component: self.name().to_string(),
                reason: format!(
                    "parameter lengths {}/{} do not match input dim {}",
                    a,
                    b,
                    input.dim()
                ),
            });
        }
        if self.options.method == NormalizeMethod::MinMax && self.options.low >= self.options.high
        {
            return Err(invalid(
                "low",
                format!("{} >= {}", self.options.low, self.options.high),
                "low below high",
            ));
        }
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let dim = input.dim();
        let mut scratch = std::mem::take(&mut self.scratch);
        input.copy_to_f64(&mut scratch)?;
        for frame in scratch.chunks_exact_mut(dim) {
            for (ch, value) in frame.iter_mut().enumerate() {
                *value = self.apply(ch, *value);
            }
        }
        let result = output.copy_from_f64(&scratch);
        self.scratch = scratch;
        result
    }

    fn flush(&mut self) {
        self.scratch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_util::run_chunked;
    use crate::transform::TransformerRunner;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_min_max() {
        let options = NormalizeOptions {
            min: vec![0.0, 10.0],
            max: vec![10.0, 10.0],
            low: -1.0,
            high: 1.0,
            ..Default::default()
        };
        let out = run_chunked(Box::new(Normalize::new(options)), &[5.0, 3.0, 10.0, 7.0], 2, 1.0, &[2]);
        assert_eq!(out, vec![0.0, -1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_fit_z_score() {
        let stream = Stream::from_f64(vec![1.0, 3.0, 5.0, 7.0], 1, 1.0, 0.0).unwrap();
        let options = NormalizeOptions::fit(&stream, NormalizeMethod::ZScore).unwrap();
        assert_abs_diff_eq!(options.mean[0], 4.0);
        assert_abs_diff_eq!(options.std[0], 5.0_f64.sqrt());

        let out = run_chunked(Box::new(Normalize::new(options)), &[4.0, 9.0], 1, 1.0, &[2]);
        assert_abs_diff_eq!(out[0], 0.0);
        assert_abs_diff_eq!(out[1], 5.0 / 5.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_parameter_length_checked() {
        let options = NormalizeOptions {
            min: vec![0.0],
            max: vec![1.0],
            ..Default::default()
        };
        let mut runner = TransformerRunner::new(Box::new(Normalize::new(options)));
        let input = Stream::from_f64(vec![1.0, 2.0], 2, 1.0, 0.0).unwrap();
        let err = runner.process(&[&input]).unwrap_err();
        assert!(err.is_configuration_fault());
    }
}
