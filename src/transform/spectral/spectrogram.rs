//! Banked spectral energies

use super::{Framer, SpectralOptions, Spectrum};
use crate::error::Result;
use crate::filter::{filterbank, WindowType};
use crate::math::{DVector, Matrix, LOG_FLOOR};
use crate::stream::{SampleType, Stream, StreamShape};
use crate::transform::{invalid, primary, primary_stream, require_floating, Transformer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramOptions {
    #[serde(flatten)]
    pub spectral: SpectralOptions,
    /// Band edges in Hz; empty emits the raw bins
    pub banks: Vec<(f64, f64)>,
    pub bank_shape: WindowType,
    /// Use power (`|X|^2`) instead of magnitude
    pub pow2: bool,
    /// Natural log of every energy (floored)
    pub log: bool,
}

impl Default for SpectrogramOptions {
    fn default() -> Self {
        Self {
            spectral: SpectralOptions::default(),
            banks: Vec::new(),
            bank_shape: WindowType::Triangular,
            pow2: false,
            log: true,
        }
    }
}

/// Filterbank energies per frame and channel. Input chunks must be whole
/// multiples of the hop.
#[derive(Debug)]
pub struct Spectrogram {
    options: SpectrogramOptions,
    state: Option<(Framer, Spectrum)>,
    filterbank: Option<Matrix>,
    scratch_in: Vec<f64>,
    scratch_out: Vec<f64>,
}

impl Spectrogram {
    pub fn new(options: SpectrogramOptions) -> Self {
        Self {
            options,
            state: None,
            filterbank: None,
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }

    fn values_per_channel(&self) -> usize {
        if self.options.banks.is_empty() {
            self.options.spectral.bins()
        } else {
            self.options.banks.len()
        }
    }
}

impl Transformer for Spectrogram {
    fn name(&self) -> &'static str {
        "spectrogram"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        self.options.spectral.validate()?;
        Ok(primary(self.name(), inputs)?.dim * self.values_per_channel())
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
        self.filterbank = if self.options.banks.is_empty() {
            None
        } else {
            Some(filterbank(
                spectral.frame,
                input.sr(),
                &self.options.banks,
                self.options.bank_shape,
            )?)
        };
        self.state = Some((Framer::new(spectral, input.dim()), Spectrum::new(spectral.frame)));
        log::debug!(
            "[SPECTROGRAM] frame {} hop {} with {} banks",
            spectral.frame,
            spectral.hop,
            self.options.banks.len()
        );
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        input.copy_to_f64(&mut self.scratch_in)?;
        self.scratch_out.clear();

        let Some((framer, spectrum)) = self.state.as_mut() else {
            return Err(invalid("spectrogram", "not entered", "enter before transform"));
        };
        let (pow2, log) = (self.options.pow2, self.options.log);
        let bank = self.filterbank.as_ref();
        let out = &mut self.scratch_out;

        framer.for_each_frame(&self.scratch_in, |_, frame| {
            let bins = spectrum.compute(frame);
            let values = DVector::from_iterator(
                bins.len(),
                bins.iter()
                    .map(|x| if pow2 { x.norm_sqr() } else { x.norm() }),
            );
            let energies = match bank {
                Some(matrix) => matrix * values,
                None => values,
            };
            if log {
                out.extend(energies.iter().map(|e| e.max(LOG_FLOOR).ln()));
            } else {
                out.extend(energies.iter().copied());
            }
        });

        output.copy_from_f64(&self.scratch_out)
    }

    fn flush(&mut self) {
        self.state = None;
        self.filterbank = None;
        self.scratch_in.clear();
        self.scratch_out.clear();
    }
}
