//! FFT-based operators
//!
//! All spectral operators cut the input into frames of `frame` samples
//! advancing by `hop`. Each input chunk must hold a whole number of hops and
//! produces one output sample per hop. The last `frame - hop` samples of
//! every channel carry over to the next chunk (zeros before the first).

mod features;
mod fft;
mod frame;
mod psd;
mod spectrogram;

pub use features::{FeatureSet, SpectralFeatures, SpectralFeaturesOptions};
pub use fft::FftTransform;
pub use psd::{Psd, PsdOptions};
pub use spectrogram::{Spectrogram, SpectrogramOptions};

pub(crate) use frame::Framer;

use super::invalid;
use crate::error::{Result, SigstreamError};
use crate::filter::WindowType;
use crate::math::Complex64;
use crate::stream::StreamShape;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Framing shared by every spectral operator
///
/// Chunks whose length is not a multiple of `hop` are rejected with
/// [`SigstreamError::ShapeMismatch`] at setup and on every chunk; partial
/// hops are not buffered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralOptions {
    /// Frame length in samples (FFT size)
    pub frame: usize,
    /// Frame advance in samples
    pub hop: usize,
    pub window: WindowType,
}

impl Default for SpectralOptions {
    fn default() -> Self {
        Self {
            frame: 256,
            hop: 128,
            window: WindowType::Hann,
        }
    }
}

impl SpectralOptions {
    pub fn validate(&self) -> Result<()> {
        if self.frame < 2 {
            return Err(invalid("frame", self.frame, "at least 2 samples"));
        }
        if self.hop == 0 || self.hop > self.frame {
            return Err(invalid("hop", self.hop, "between 1 and the frame length"));
        }
        Ok(())
    }

    /// One-sided bin count: `frame / 2 + 1`
    pub fn bins(&self) -> usize {
        self.frame / 2 + 1
    }

    /// Frames produced by a chunk of this shape
    pub(crate) fn frames(&self, component: &str, input: &StreamShape) -> Result<usize> {
        self.validate()?;
        if input.num % self.hop != 0 {
            log::error!(
                "[{}] chunk of {} samples is not a multiple of hop {}",
                component.to_uppercase(),
                input.num,
                self.hop
            );
            return Err(SigstreamError::ShapeMismatch {
                component: component.to_string(),
                reason: format!(
                    "chunk of {} samples is not a multiple of hop {}",
                    input.num, self.hop
                ),
            });
        }
        Ok(input.num / self.hop)
    }
}

/// Planned real-input FFT of one frame length
pub(crate) struct Spectrum {
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex64>,
    scratch: Vec<Complex64>,
    bins: usize,
}

impl Spectrum {
    pub fn new(frame: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(frame);
        let scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            buffer: vec![Complex64::new(0.0, 0.0); frame],
            scratch,
            bins: frame / 2 + 1,
        }
    }

    /// One-sided spectrum of a real frame
    pub fn compute(&mut self, frame: &[f64]) -> &[Complex64] {
        for (dst, &x) in self.buffer.iter_mut().zip(frame) {
            *dst = Complex64::new(x, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        &self.buffer[..self.bins]
    }
}

impl std::fmt::Debug for Spectrum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spectrum")
            .field("frame", &self.buffer.len())
            .field("bins", &self.bins)
            .finish()
    }
}

/// One-sided power spectral density `|X_k|^2 / frame`
///
/// Every bin except DC and (for even frames) Nyquist is doubled so that the
/// bins sum to the mean-square power of the frame times its length.
pub(crate) fn one_sided_psd(spectrum: &[Complex64], frame: usize, out: &mut Vec<f64>) {
    out.clear();
    let last = spectrum.len().saturating_sub(1);
    let scale = 1.0 / frame as f64;
    for (k, x) in spectrum.iter().enumerate() {
        let mut p = x.norm_sqr() * scale;
        let unpaired = k == 0 || (k == last && frame % 2 == 0);
        if !unpaired {
            p *= 2.0;
        }
        out.push(p);
    }
}
