//! Moving average and variance
//!
//! Two strategies share one operator:
//! - `Moving`: exact statistics over the last `N = round(window * sr)`
//!   samples, kept as a running sum and sum of squares over a circular
//!   history. Until the window fills, the divisor is the number of samples
//!   seen so far.
//! - `Sliding`: exponentially weighted mean and variance with
//!   `alpha = 2 / (N + 1)`, seeded by the first sample.

use super::{
    decay_alpha, invalid, primary, primary_stream, require_floating, window_samples, Transformer,
};
use crate::error::Result;
use crate::stream::{SampleType, Stream, StreamShape};
use serde::{Deserialize, Serialize};

/// Windowing strategy shared by the moving statistics operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovingMethod {
    /// Exact window over a circular history
    #[default]
    Moving,
    /// Exponential approximation of the window
    Sliding,
}

/// Output layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvgVarFormat {
    #[default]
    Average,
    Variance,
    /// `avg, var` interleaved per channel
    Both,
}

impl AvgVarFormat {
    fn width(&self) -> usize {
        match self {
            AvgVarFormat::Both => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MvgAvgVarOptions {
    pub method: MovingMethod,
    pub format: AvgVarFormat,
    /// Window length in seconds
    pub window: f64,
}

impl Default for MvgAvgVarOptions {
    fn default() -> Self {
        Self {
            method: MovingMethod::Moving,
            format: AvgVarFormat::Average,
            window: 10.0,
        }
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Exact window statistics for one channel
#[derive(Debug, Clone)]
struct MovingState {
    history: Vec<f64>,
    position: usize,
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl MovingState {
    fn new(window: usize) -> Self {
        Self {
            history: vec![0.0; window],
            position: 0,
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    fn update(&mut self, x: f64) -> (f64, f64) {
        let window = self.history.len();
        if self.count == window {
            let oldest = self.history[self.position];
            self.sum -= oldest;
            self.sum_sq -= oldest * oldest;
        } else {
            self.count += 1;
        }
        self.history[self.position] = x;
        self.sum += x;
        self.sum_sq += x * x;
        self.position = (self.position + 1) % window;

        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        (mean, variance)
    }
}

/// Exponentially weighted statistics for one channel
#[derive(Debug, Clone, Default)]
struct SlidingState {
    mean: f64,
    variance: f64,
    seeded: bool,
}

impl SlidingState {
    fn update(&mut self, x: f64, alpha: f64) -> (f64, f64) {
        if !self.seeded {
            self.mean = x;
            self.variance = 0.0;
            self.seeded = true;
        } else {
            let diff = x - self.mean;
            let increment = alpha * diff;
            self.mean += increment;
            self.variance = (1.0 - alpha) * (self.variance + diff * increment);
        }
        (self.mean, self.variance)
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    Moving(Vec<MovingState>),
    Sliding { alpha: f64, states: Vec<SlidingState> },
}

// ============================================================================
// Operator
// ============================================================================

/// Moving average and/or variance per channel
#[derive(Debug, Clone)]
pub struct MvgAvgVar {
    options: MvgAvgVarOptions,
    strategy: Option<Strategy>,
    scratch_in: Vec<f64>,
    scratch_out: Vec<f64>,
}

impl MvgAvgVar {
    pub fn new(options: MvgAvgVarOptions) -> Self {
        Self {
            options,
            strategy: None,
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }
}

impl Transformer for MvgAvgVar {
    fn name(&self) -> &'static str {
        "mvgavgvar"
    }

    fn output_dim(&self, inputs: &[StreamShape]) -> Result<usize> {
        Ok(primary(self.name(), inputs)?.dim * self.options.format.width())
    }

    fn output_type(&self, inputs: &[StreamShape]) -> Result<SampleType> {
        require_floating(self.name(), primary(self.name(), inputs)?)
    }

    fn enter(&mut self, inputs: &[&Stream], _output: &StreamShape) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        if !(self.options.window > 0.0) {
            log::error!("[MVGAVGVAR] window must be positive, got {}", self.options.window);
            return Err(invalid("window", self.options.window, "positive length in seconds"));
        }
        let n = window_samples(self.options.window, input.sr());
        self.strategy = Some(match self.options.method {
            MovingMethod::Moving => Strategy::Moving(vec![MovingState::new(n); input.dim()]),
            MovingMethod::Sliding => Strategy::Sliding {
                alpha: decay_alpha(n),
                states: vec![SlidingState::default(); input.dim()],
            },
        });
        log::debug!(
            "[MVGAVGVAR] {:?} window of {} samples on {} channels",
            self.options.method,
            n,
            input.dim()
        );
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let dim = input.dim();
        input.copy_to_f64(&mut self.scratch_in)?;
        self.scratch_out.clear();

        let Some(strategy) = self.strategy.as_mut() else {
            return Err(invalid("mvgavgvar", "not entered", "enter before transform"));
        };
        let format = self.options.format;

        for frame in self.scratch_in.chunks_exact(dim) {
            for (ch, &x) in frame.iter().enumerate() {
                let (mean, variance) = match strategy {
                    Strategy::Moving(states) => states[ch].update(x),
                    Strategy::Sliding { alpha, states } => states[ch].update(x, *alpha),
                };
                match format {
                    AvgVarFormat::Average => self.scratch_out.push(mean),
                    AvgVarFormat::Variance => self.scratch_out.push(variance),
                    AvgVarFormat::Both => self.scratch_out.extend([mean, variance]),
                }
            }
        }

        output.copy_from_f64(&self.scratch_out)
    }

    fn flush(&mut self) {
        self.strategy = None;
        self.scratch_in.clear();
        self.scratch_out.clear();
    }
}
