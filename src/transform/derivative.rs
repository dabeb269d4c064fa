//! Derivatives up to fourth order
//!
//! Each order is the per-second difference of the order below it, so the
//! history keeps the previous value of every order up to the highest one
//! requested.

use super::{primary, primary_stream, require_floating, Transformer};
use crate::error::Result;
use crate::stream::{SampleType, Stream, StreamShape};
use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Highest supported derivative order
pub const MAX_ORDER: usize = 4;

/// Set of derivative orders to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivativeSet(u8);

impl DerivativeSet {
    pub const ZERO: Self = Self(1);
    pub const FIRST: Self = Self(1 << 1);
    pub const SECOND: Self = Self(1 << 2);
    pub const THIRD: Self = Self(1 << 3);
    pub const FOURTH: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, order: usize) -> bool {
        order <= MAX_ORDER && self.0 & (1 << order) != 0
    }

    /// Emitted orders, ascending
    pub fn orders(&self) -> Vec<usize> {
        (0..=MAX_ORDER).filter(|&o| self.contains(o)).collect()
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn highest(&self) -> Option<usize> {
        self.orders().last().copied()
    }
}

impl BitOr for DerivativeSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for DerivativeSet {
    fn default() -> Self {
        Self::ZERO | Self::FIRST
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeOptions {
    pub orders: DerivativeSet,
}

/// Emits the requested derivative orders of every input channel
///
/// Output layout per sample: for each input channel, its orders ascending.
#[derive(Debug, Clone)]
pub struct Derivative {
    options: DerivativeOptions,
    orders: Vec<usize>,
    highest: usize,
    /// `dim * highest` previous values, channel-major
    history: Vec<f64>,
    seeded: bool,
    sr: f64,
    scratch_in: Vec<f64>,
    scratch_out: Vec<f64>,
}

impl Derivative {
    pub fn new(options: DerivativeOptions) -> Self {
        let orders = options.orders.orders();
        Self {
            highest: options.orders.highest().unwrap_or(0),
            orders,
            options,
            history: Vec::new(),
            seeded: false,
            sr: 0.0,
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }
}

impl Transformer for Derivative {
    fn name(&self) -> &'static str {
        "derivative"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        if self.options.orders.is_empty() {
            return Err(super::invalid("orders", 0, "at least one order between 0 and 4"));
        }
        Ok(primary(self.name(), inputs)?.dim * self.options.orders.count())
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        require_floating(self.name(), primary(self.name(), inputs)?)
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        self.history = vec![0.0; input.dim() * self.highest];
        self.seeded = false;
        self.sr = input.sr();
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let dim = input.dim();
        input.copy_to_f64(&mut self.scratch_in)?;
        self.scratch_out.clear();

        let highest = self.highest;
        let mut values = [0.0; MAX_ORDER + 1];

        for frame in self.scratch_in.chunks_exact(dim) {
            if !self.seeded {
                for (ch, &x) in frame.iter().enumerate() {
                    if highest > 0 {
                        self.history[ch * highest] = x;
                    }
                }
                self.seeded = true;
            }
            for (ch, &x) in frame.iter().enumerate() {
                let history = &mut self.history[ch * highest..(ch + 1) * highest];
                values[0] = x;
                for order in 1..=highest {
                    let previous = values[order - 1];
                    values[order] = (previous - history[order - 1]) * self.sr;
                    history[order - 1] = previous;
                }
                self.scratch_out
                    .extend(self.orders.iter().map(|&o| values[o]));
            }
        }

        output.copy_from_f64(&self.scratch_out)
    }

    fn flush(&mut self) {
        self.history.clear();
        self.scratch_in.clear();
        self.scratch_out.clear();
        self.seeded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_util::run_chunked;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_derivative_set() {
        let set = DerivativeSet::FIRST | DerivativeSet::THIRD;
        assert_eq!(set.orders(), vec![1, 3]);
        assert_eq!(set.count(), 2);
        assert!(!set.contains(0));
        assert_eq!(DerivativeSet::from_bits(0xff), DerivativeSet::ALL);
    }

    #[test]
    fn test_ramp_has_constant_first_derivative() {
        let input: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let options = DerivativeOptions {
            orders: DerivativeSet::ZERO | DerivativeSet::FIRST | DerivativeSet::SECOND,
        };
        let out = run_chunked(Box::new(Derivative::new(options)), &input, 1, 10.0, &[10]);
        assert_eq!(out.len(), 30);
        // First sample seeds the history
        assert_eq!(&out[0..3], &[0.0, 0.0, 0.0]);
        assert_abs_diff_eq!(out[3 * 5 + 1], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[3 * 5 + 2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_chunk_invariance() {
        let input: Vec<f64> = (0..40).map(|i| ((i * i) % 7) as f64).collect();
        let options = DerivativeOptions {
            orders: DerivativeSet::ALL,
        };
        let whole = run_chunked(Box::new(Derivative::new(options.clone())), &input, 2, 5.0, &[20]);
        let split = run_chunked(Box::new(Derivative::new(options)), &input, 2, 5.0, &[3, 9, 8]);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_empty_set_rejected() {
        let d = Derivative::new(DerivativeOptions {
            orders: DerivativeSet::from_bits(0),
        });
        let shape = StreamShape::new(1, 1, 1.0, SampleType::Float);
        assert!(d.negotiate(&[shape]).is_err());
    }
}
