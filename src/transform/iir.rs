//! IIR filtering
//!
//! [`Iir`] runs a fixed cascade of second-order sections over every channel.
//! [`Butfilt`] designs a Butterworth cascade from its options when it enters
//! and delegates the filtering to an inner [`Iir`].

use super::{invalid, primary, primary_stream, require_floating, Transformer};
use crate::error::Result;
use crate::filter::{butterworth, FilterType, Section, SosTable};
use crate::stream::{SampleType, Stream, StreamShape};
use serde::{Deserialize, Serialize};

/// Direct form II history of one section on one channel
#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    w1: f64,
    w2: f64,
}

impl SectionState {
    #[inline]
    fn process(&mut self, input: f64, s: &Section) -> f64 {
        let w0 = input - s.a1 * self.w1 - s.a2 * self.w2;
        let output = s.b0 * w0 + s.b1 * self.w1 + s.b2 * self.w2;
        self.w2 = self.w1;
        self.w1 = w0;
        output
    }
}

// ============================================================================
// Iir
// ============================================================================

/// Cascade of second-order sections applied per channel
///
/// Accepts FLOAT or DOUBLE and emits the same kind.
#[derive(Debug, Clone)]
pub struct Iir {
    sos: SosTable,
    dim: usize,
    /// `sections * dim` states, channel-major
    states: Vec<SectionState>,
    scratch: Vec<f64>,
}

impl Iir {
    pub fn new(sos: SosTable) -> Self {
        Self {
            sos,
            dim: 0,
            states: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn sos(&self) -> &SosTable {
        &self.sos
    }

    fn allocate(&mut self, dim: usize) {
        self.dim = dim;
        self.states = vec![SectionState::default(); self.sos.len() * dim];
    }

    /// Filter sample-major `values` of `dim` channels in place
    pub(crate) fn filter_in_place(&mut self, values: &mut [f64]) {
        let sections = self.sos.sections();
        let n_sections = sections.len();
        if self.dim == 0 {
            return;
        }
        for frame in values.chunks_exact_mut(self.dim) {
            for (ch, value) in frame.iter_mut().enumerate() {
                let states = &mut self.states[ch * n_sections..(ch + 1) * n_sections];
                let mut x = *value;
                for (state, section) in states.iter_mut().zip(sections) {
                    x = state.process(x, section);
                }
                *value = x;
            }
        }
    }
}

impl Transformer for Iir {
    fn name(&self) -> &'static str {
        "iir"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        Ok(primary(self.name(), inputs)?.dim)
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        require_floating(self.name(), primary(self.name(), inputs)?)
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        require_floating(self.name(), &input.shape())?;
        if self.sos.is_empty() {
            log::error!("[IIR] empty coefficient table");
            return Err(invalid("coefficients", 0, "at least one section"));
        }
        self.allocate(input.dim());
        log::debug!(
            "[IIR] {} sections on {} channels",
            self.sos.len(),
            input.dim()
        );
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let mut scratch = std::mem::take(&mut self.scratch);
        input.copy_to_f64(&mut scratch)?;
        self.filter_in_place(&mut scratch);
        let result = output.copy_from_f64(&scratch);
        self.scratch = scratch;
        result
    }

    fn flush(&mut self) {
        self.states.clear();
        self.scratch.clear();
        self.dim = 0;
    }
}

// ============================================================================
// Butfilt
// ============================================================================

/// Butterworth filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButfiltOptions {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub order: usize,
    /// Cutoff for low/high-pass, lower edge for band-pass
    pub low: f64,
    /// Upper edge for band-pass
    pub high: f64,
    /// Cutoffs are relative to Nyquist; otherwise in Hz
    pub norm: bool,
    /// Subtract the first sample before filtering
    pub zero: bool,
}

impl Default for ButfiltOptions {
    fn default() -> Self {
        Self {
            filter_type: FilterType::LowPass,
            order: 3,
            low: 0.1,
            high: 0.5,
            norm: true,
            zero: false,
        }
    }
}

impl ButfiltOptions {
    /// Cutoffs relative to Nyquist for a stream at `sr`
    fn normalized(&self, sr: f64) -> Result<(f64, f64)> {
        if self.norm {
            return Ok((self.low, self.high));
        }
        if sr <= 0.0 {
            return Err(invalid("sr", sr, "positive sample rate for cutoffs in Hz"));
        }
        let nyquist = sr / 2.0;
        Ok((self.low / nyquist, self.high / nyquist))
    }
}

/// Butterworth low/high/band-pass filter
#[derive(Debug, Clone)]
pub struct Butfilt {
    options: ButfiltOptions,
    iir: Option<Iir>,
    /// First sample per channel, captured when `zero` is set
    offset: Option<Vec<f64>>,
    scratch: Vec<f64>,
}

impl Butfilt {
    pub fn new(options: ButfiltOptions) -> Self {
        Self {
            options,
            iir: None,
            offset: None,
            scratch: Vec::new(),
        }
    }

    pub fn options(&self) -> &ButfiltOptions {
        &self.options
    }

    /// Designed coefficients, available after `enter`
    pub fn sos(&self) -> Option<&SosTable> {
        self.iir.as_ref().map(|iir| iir.sos())
    }
}

impl Transformer for Butfilt {
    fn name(&self) -> &'static str {
        "butfilt"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        Ok(primary(self.name(), inputs)?.dim)
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        require_floating(self.name(), primary(self.name(), inputs)?)
    }

    fn enter(&mut self, inputs: &[&Stream], output: &StreamShape) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let (low, high) = self.options.normalized(input.sr())?;
        let sos = butterworth(self.options.filter_type, self.options.order, low, high)
            .map_err(|e| {
                log::error!("[BUTFILT] filter design failed: {}", e);
                e
            })?;
        log::info!(
            "[BUTFILT] {:?} order {} ({:.4}, {:.4}) -> {} sections",
            self.options.filter_type,
            self.options.order,
            low,
            high,
            sos.len()
        );
        let mut iir = Iir::new(sos);
        iir.enter(inputs, output)?;
        self.iir = Some(iir);
        self.offset = None;
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let Some(iir) = self.iir.as_mut() else {
            return Err(invalid("butfilt", "not entered", "enter before transform"));
        };

        let mut scratch = std::mem::take(&mut self.scratch);
        input.copy_to_f64(&mut scratch)?;
        let dim = input.dim();

        if self.options.zero && self.offset.is_none() && scratch.len() >= dim && dim > 0 {
            self.offset = Some(scratch[..dim].to_vec());
        }
        let offset = if self.options.zero {
            self.offset.as_deref()
        } else {
            None
        };

        if let Some(offset) = offset {
            for frame in scratch.chunks_exact_mut(dim) {
                for (v, o) in frame.iter_mut().zip(offset) {
                    *v -= o;
                }
            }
        }

        iir.filter_in_place(&mut scratch);

        // DC passes a low-pass, so the removed offset is restored
        if let (Some(offset), FilterType::LowPass) = (offset, self.options.filter_type) {
            for frame in scratch.chunks_exact_mut(dim) {
                for (v, o) in frame.iter_mut().zip(offset) {
                    *v += o;
                }
            }
        }

        let result = output.copy_from_f64(&scratch);
        self.scratch = scratch;
        result
    }

    fn flush(&mut self) {
        if let Some(iir) = self.iir.as_mut() {
            iir.flush();
        }
        self.iir = None;
        self.offset = None;
        self.scratch.clear();
    }
}
