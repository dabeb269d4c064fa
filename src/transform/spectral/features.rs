//! Scalar spectral descriptors per frame

use super::{one_sided_psd, Framer, SpectralOptions, Spectrum};
use crate::error::Result;
use crate::math::{entropy, normalize_probabilities, LOG_FLOOR};
use crate::stream::{SampleType, Stream, StreamShape};
use crate::transform::{invalid, primary, primary_stream, require_floating, Transformer};
use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Fraction of total power below the rolloff frequency
pub const ROLLOFF_FRACTION: f64 = 0.85;

/// Set of descriptors to emit, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(u8);

impl FeatureSet {
    /// Power-weighted mean frequency (Hz)
    pub const CENTROID: Self = Self(1);
    /// Power-weighted standard deviation around the centroid (Hz)
    pub const SPREAD: Self = Self(1 << 1);
    /// Geometric over arithmetic mean of the power
    pub const FLATNESS: Self = Self(1 << 2);
    /// Frequency below which 85% of the power lies (Hz)
    pub const ROLLOFF: Self = Self(1 << 3);
    /// Euclidean distance to the previous frame's magnitudes
    pub const FLUX: Self = Self(1 << 4);
    /// Entropy of the normalised power
    pub const ENTROPY: Self = Self(1 << 5);
    /// Total power
    pub const ENERGY: Self = Self(1 << 6);
    pub const ALL: Self = Self(0b111_1111);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FeatureSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralFeaturesOptions {
    #[serde(flatten)]
    pub spectral: SpectralOptions,
    pub features: FeatureSet,
}

/// Frame-level spectral descriptors per channel, one row per hop-aligned frame
#[derive(Debug)]
pub struct SpectralFeatures {
    options: SpectralFeaturesOptions,
    state: Option<(Framer, Spectrum)>,
    /// Previous magnitudes per channel, for flux
    previous: Vec<Vec<f64>>,
    bin_hz: f64,
    scratch_in: Vec<f64>,
    scratch_out: Vec<f64>,
}

impl SpectralFeatures {
    pub fn new(options: SpectralFeaturesOptions) -> Self {
        Self {
            options,
            state: None,
            previous: Vec::new(),
            bin_hz: 0.0,
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }
}

/// Descriptors of one frame, appended to `out` in declaration order
fn describe(
    features: FeatureSet,
    power: &mut [f64],
    magnitude: &[f64],
    previous: &mut [f64],
    bin_hz: f64,
    out: &mut Vec<f64>,
) {
    let total: f64 = power.iter().sum();
    let freq = |k: usize| k as f64 * bin_hz;

    let centroid = if total > 0.0 {
        power.iter().enumerate().map(|(k, p)| freq(k) * p).sum::<f64>() / total
    } else {
        0.0
    };

    if features.contains(FeatureSet::CENTROID) {
        out.push(centroid);
    }
    if features.contains(FeatureSet::SPREAD) {
        let spread = if total > 0.0 {
            let var = power
                .iter()
                .enumerate()
                .map(|(k, p)| (freq(k) - centroid).powi(2) * p)
                .sum::<f64>()
                / total;
            var.sqrt()
        } else {
            0.0
        };
        out.push(spread);
    }
    if features.contains(FeatureSet::FLATNESS) {
        let n = power.len() as f64;
        let flatness = if total > 0.0 {
            let log_mean = power.iter().map(|p| p.max(LOG_FLOOR).ln()).sum::<f64>() / n;
            log_mean.exp() / (total / n)
        } else {
            0.0
        };
        out.push(flatness);
    }
    if features.contains(FeatureSet::ROLLOFF) {
        let threshold = ROLLOFF_FRACTION * total;
        let mut cumulative = 0.0;
        let mut rolloff = 0.0;
        if total > 0.0 {
            for (k, p) in power.iter().enumerate() {
                cumulative += p;
                if cumulative >= threshold {
                    rolloff = freq(k);
                    break;
                }
            }
        }
        out.push(rolloff);
    }
    if features.contains(FeatureSet::FLUX) {
        let flux = magnitude
            .iter()
            .zip(previous.iter())
            .map(|(m, p)| (m - p).powi(2))
            .sum::<f64>()
            .sqrt();
        out.push(flux);
    }
    previous.copy_from_slice(magnitude);
    if features.contains(FeatureSet::ENTROPY) {
        normalize_probabilities(power);
        out.push(entropy(power));
    }
    if features.contains(FeatureSet::ENERGY) {
        out.push(total);
    }
}

impl Transformer for SpectralFeatures {
    fn name(&self) -> &'static str {
        "spectralfeatures"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        self.options.spectral.validate()?;
        if self.options.features.is_empty() {
            return Err(invalid("features", 0, "at least one descriptor"));
        }
        Ok(primary(self.name(), inputs)?.dim * self.options.features.count())
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        require_floating(self.name(), primary(self.name(), inputs)?)
    }

    fn output_num(&self, inputs: &[StreamShape]) -> Result<usize> {
        self.options
            .spectral
            .frames(self.name(), primary(self.name(), inputs)?)
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let spectral = &self.options.spectral;
        spectral.validate()?;
        self.bin_hz = input.sr() / spectral.frame as f64;
        self.previous = vec![vec![0.0; spectral.bins()]; input.dim()];
        self.state = Some((Framer::new(spectral, input.dim()), Spectrum::new(spectral.frame)));
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        input.copy_to_f64(&mut self.scratch_in)?;
        self.scratch_out.clear();

        let Some((framer, spectrum)) = self.state.as_mut() else {
            return Err(invalid("spectralfeatures", "not entered", "enter before transform"));
        };
        let features = self.options.features;
        let frame_len = self.options.spectral.frame;
        let bin_hz = self.bin_hz;
        let previous = &mut self.previous;
        let out = &mut self.scratch_out;
        let mut power = Vec::new();
        let mut magnitude = Vec::new();

        framer.for_each_frame(&self.scratch_in, |ch, frame| {
            let bins = spectrum.compute(frame);
            magnitude.clear();
            magnitude.extend(bins.iter().map(|x| x.norm()));
            one_sided_psd(bins, frame_len, &mut power);
            describe(features, &mut power, &magnitude, &mut previous[ch], bin_hz, out);
        });

        output.copy_from_f64(&self.scratch_out)
    }

    fn flush(&mut self) {
        self.state = None;
        self.previous.clear();
        self.scratch_in.clear();
        self.scratch_out.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::WindowType;
    use crate::transform::test_util::run_chunked;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn options(features: FeatureSet) -> SpectralFeaturesOptions {
        SpectralFeaturesOptions {
            spectral: SpectralOptions {
                frame: 8,
                hop: 8,
                window: WindowType::Rectangular,
            },
            features,
        }
    }

    fn tone(frames: usize) -> Vec<f64> {
        (0..8 * frames)
            .map(|i| (2.0 * PI * 2.0 * i as f64 / 8.0).cos())
            .collect()
    }

    #[test]
    fn test_pure_tone_descriptors() {
        let set = FeatureSet::CENTROID | FeatureSet::SPREAD | FeatureSet::ROLLOFF | FeatureSet::ENERGY;
        let out = run_chunked(Box::new(SpectralFeatures::new(options(set))), &tone(1), 1, 8.0, &[8]);
        assert_eq!(out.len(), 4);
        assert_abs_diff_eq!(out[0], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[2], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[3], 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_flux_is_zero_for_steady_signal() {
        let out = run_chunked(
            Box::new(SpectralFeatures::new(options(FeatureSet::FLUX))),
            &tone(3),
            1,
            8.0,
            &[8, 16],
        );
        assert!(out[0] > 1.0);
        assert_abs_diff_eq!(out[1], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[2], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_silence_is_well_defined() {
        let out = run_chunked(
            Box::new(SpectralFeatures::new(options(FeatureSet::ALL))),
            &[0.0; 8],
            1,
            8.0,
            &[8],
        );
        assert_eq!(out.len(), 7);
        assert!(out.iter().all(|v| v.is_finite()));
    }
}
