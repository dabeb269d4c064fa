//! Envelope follower
//!
//! One-pole smoothing of `|x|` with separate attack and release constants:
//! `coeff = exp(-1 / time_in_samples)`.

use super::{invalid, primary, primary_stream, require_floating, Transformer};
use crate::error::Result;
use crate::stream::{SampleType, Stream, StreamShape};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeOptions {
    /// Attack time in seconds
    pub attack: f64,
    /// Release time in seconds
    pub release: f64,
}

impl Default for EnvelopeOptions {
    fn default() -> Self {
        Self {
            attack: 0.01,
            release: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    options: EnvelopeOptions,
    attack_coeff: f64,
    release_coeff: f64,
    /// Current level per channel
    level: Vec<f64>,
    scratch: Vec<f64>,
}

impl Envelope {
    pub fn new(options: EnvelopeOptions) -> Self {
        Self {
            options,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            level: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

fn smoothing_coeff(seconds: f64, sr: f64) -> f64 {
    let samples = seconds * sr;
    if samples > 0.0 {
        (-1.0 / samples).exp()
    } else {
        0.0
    }
}

impl Transformer for Envelope {
    fn name(&self) -> &'static str {
        "envelope"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        Ok(primary(self.name(), inputs)?.dim)
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        require_floating(self.name(), primary(self.name(), inputs)?)
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        if self.options.attack < 0.0 || self.options.release < 0.0 {
            return Err(invalid(
                "attack/release",
                format!("{}/{}", self.options.attack, self.options.release),
                "non-negative times in seconds",
            ));
        }
        self.attack_coeff = smoothing_coeff(self.options.attack, input.sr());
        self.release_coeff = smoothing_coeff(self.options.release, input.sr());
        self.level = vec![0.0; input.dim()];
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let dim = input.dim();
        input.copy_to_f64(&mut self.scratch)?;

        for frame in self.scratch.chunks_exact_mut(dim) {
            for (value, level) in frame.iter_mut().zip(self.level.iter_mut()) {
                let target = value.abs();
                let coeff = if target > *level {
                    self.attack_coeff
                } else {
                    self.release_coeff
                };
                *level = coeff * *level + (1.0 - coeff) * target;
                *value = *level;
            }
        }

        output.copy_from_f64(&self.scratch)
    }

    fn flush(&mut self) {
        self.level.clear();
        self.scratch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_util::run_chunked;

    #[test]
    fn test_follows_rectified_signal() {
        let input: Vec<f64> = (0..200).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let out = run_chunked(Box::new(Envelope::new(Default::default())), &input, 1, 100.0, &[200]);
        assert!(out[199] > 0.99);
        assert!(out.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_release_decays() {
        let mut input = vec![1.0; 50];
        input.extend(vec![0.0; 50]);
        let out = run_chunked(Box::new(Envelope::new(Default::default())), &input, 1, 100.0, &[100]);
        assert!(out[99] < out[49]);
        assert!(out[99] > 0.0);
    }

    #[test]
    fn test_zero_attack_is_instant() {
        let options = EnvelopeOptions {
            attack: 0.0,
            release: 1.0,
        };
        let out = run_chunked(Box::new(Envelope::new(options)), &[0.0, -2.0, 0.0], 1, 10.0, &[1, 2]);
        assert_eq!(out[1], 2.0);
        assert!(out[2] < 2.0);
    }
}
