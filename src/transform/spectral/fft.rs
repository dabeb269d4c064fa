//! Raw spectrum: `[re, im, magnitude]` per bin

use super::{Framer, SpectralOptions, Spectrum};
use crate::error::Result;
use crate::stream::{SampleType, Stream, StreamShape};
use crate::transform::{primary, primary_stream, require_floating, Transformer};

/// Emits the one-sided spectrum of every frame
///
/// Per output sample and input channel: `frame / 2 + 1` bins, each written
/// as three interleaved values `re, im, |X|`.
#[derive(Debug)]
pub struct FftTransform {
    options: SpectralOptions,
    state: Option<(Framer, Spectrum)>,
    scratch_in: Vec<f64>,
    scratch_out: Vec<f64>,
}

impl FftTransform {
    pub fn new(options: SpectralOptions) -> Self {
        Self {
            options,
            state: None,
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }
}

impl Transformer for FftTransform {
    fn name(&self) -> &'static str {
        "fft"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        self.options.validate()?;
        Ok(primary(self.name(), inputs)?.dim * self.options.bins() * 3)
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        require_floating(self.name(), primary(self.name(), inputs)?)
    }

    fn output_num(&self, inputs: &[StreamShape]) -> Result<usize> {
        self.options.frames(self.name(), primary(self.name(), inputs)?)
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        self.options.validate()?;
        self.state = Some((
            Framer::new(&self.options, input.dim()),
            Spectrum::new(self.options.frame),
        ));
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        input.copy_to_f64(&mut self.scratch_in)?;
        self.scratch_out.clear();

        let Some((framer, spectrum)) = self.state.as_mut() else {
            return Err(crate::transform::invalid("fft", "not entered", "enter before transform"));
        };
        let out = &mut self.scratch_out;
        framer.for_each_frame(&self.scratch_in, |_, frame| {
            for x in spectrum.compute(frame) {
                out.extend([x.re, x.im, x.norm()]);
            }
        });

        output.copy_from_f64(&self.scratch_out)
    }

    fn flush(&mut self) {
        self.state = None;
        self.scratch_in.clear();
        self.scratch_out.clear();
    }
}
