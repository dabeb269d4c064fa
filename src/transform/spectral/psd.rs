//! Power spectral density

use super::{one_sided_psd, Framer, SpectralOptions, Spectrum};
use crate::error::Result;
use crate::math::{entropy, normalize_probabilities, LOG_FLOOR};
use crate::stream::{SampleType, Stream, StreamShape};
use crate::transform::{invalid, primary, primary_stream, require_floating, Transformer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PsdOptions {
    #[serde(flatten)]
    pub spectral: SpectralOptions,
    /// Natural log of every bin (floored)
    pub log: bool,
    /// Reduce each frame to the entropy of its normalised PSD
    pub entropy: bool,
}

/// One-sided PSD per frame and channel, or its entropy
///
/// Input chunks must be whole multiples of the hop.
///
/// When `entropy` is set, `log` is ignored: the entropy is taken over the
/// linear PSD.
#[derive(Debug)]
pub struct Psd {
    options: PsdOptions,
    state: Option<(Framer, Spectrum)>,
    psd: Vec<f64>,
    scratch_in: Vec<f64>,
    scratch_out: Vec<f64>,
}

impl Psd {
    pub fn new(options: PsdOptions) -> Self {
        Self {
            options,
            state: None,
            psd: Vec::new(),
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }

    fn values_per_channel(&self) -> usize {
        if self.options.entropy {
            1
        } else {
            self.options.spectral.bins()
        }
    }
}

impl Transformer for Psd {
    fn name(&self) -> &'static str {
        "psd"
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
        self.state = Some((Framer::new(spectral, input.dim()), Spectrum::new(spectral.frame)));
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        input.copy_to_f64(&mut self.scratch_in)?;
        self.scratch_out.clear();

        let Some((framer, spectrum)) = self.state.as_mut() else {
            return Err(invalid("psd", "not entered", "enter before transform"));
        };
        let frame_len = self.options.spectral.frame;
        let (log, reduce) = (self.options.log, self.options.entropy);
        let psd = &mut self.psd;
        let out = &mut self.scratch_out;

        framer.for_each_frame(&self.scratch_in, |_, frame| {
            one_sided_psd(spectrum.compute(frame), frame_len, psd);
            if reduce {
                normalize_probabilities(psd);
                out.push(entropy(psd));
            } else if log {
                out.extend(psd.iter().map(|p| p.max(LOG_FLOOR).ln()));
            } else {
                out.extend_from_slice(psd);
            }
        });

        output.copy_from_f64(&self.scratch_out)
    }

    fn flush(&mut self) {
        self.state = None;
        self.psd.clear();
        self.scratch_in.clear();
        self.scratch_out.clear();
    }
}
