//! Moving minimum and maximum
//!
//! The `Moving` strategy splits the window into `number_of_blocks` blocks of
//! `L = max(1, N / blocks)` samples. Extremes of the block being filled are
//! tracked sample by sample; when it completes it is committed into a ring of
//! block slots and the global extremes are rescanned over the committed
//! blocks only, so the per-sample cost is independent of the window length.
//!
//! The `Sliding` strategy pulls each estimate toward the newest sample with
//! `alpha = 2 / (N + 1)` and clamps it so it never crosses that sample.

use super::{
    decay_alpha, invalid, primary, primary_stream, require_floating, window_samples, MovingMethod,
    Transformer,
};
use crate::error::Result;
use crate::stream::{SampleType, Stream, StreamShape};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinMaxFormat {
    Min,
    Max,
    /// `min, max` interleaved per channel
    #[default]
    Both,
}

impl MinMaxFormat {
    fn width(&self) -> usize {
        match self {
            MinMaxFormat::Both => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MvgMinMaxOptions {
    pub method: MovingMethod,
    pub format: MinMaxFormat,
    /// Window length in seconds
    pub window: f64,
    pub number_of_blocks: usize,
}

impl Default for MvgMinMaxOptions {
    fn default() -> Self {
        Self {
            method: MovingMethod::Moving,
            format: MinMaxFormat::Both,
            window: 10.0,
            number_of_blocks: 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Extremes {
    min: f64,
    max: f64,
}

impl Extremes {
    const EMPTY: Self = Self {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };

    #[inline]
    fn include(&mut self, x: f64) {
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    #[inline]
    fn merge(&self, other: &Extremes) -> Extremes {
        Extremes {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Block-partitioned window for one channel
#[derive(Debug, Clone)]
struct BlockState {
    block_len: usize,
    blocks: Vec<Extremes>,
    next_slot: usize,
    committed: usize,
    global: Extremes,
    current: Extremes,
    current_len: usize,
}

impl BlockState {
    fn new(block_len: usize, blocks: usize) -> Self {
        Self {
            block_len,
            blocks: vec![Extremes::EMPTY; blocks],
            next_slot: 0,
            committed: 0,
            global: Extremes::EMPTY,
            current: Extremes::EMPTY,
            current_len: 0,
        }
    }

    fn update(&mut self, x: f64) -> Extremes {
        self.current.include(x);
        self.current_len += 1;
        let result = self.global.merge(&self.current);

        if self.current_len == self.block_len {
            self.blocks[self.next_slot] = self.current;
            self.next_slot = (self.next_slot + 1) % self.blocks.len();
            self.committed = (self.committed + 1).min(self.blocks.len());
            self.global = self
                .blocks
                .iter()
                .take(self.committed)
                .fold(Extremes::EMPTY, |acc, b| acc.merge(b));
            self.current = Extremes::EMPTY;
            self.current_len = 0;
        }

        result
    }
}

/// Exponential extremes for one channel
#[derive(Debug, Clone, Copy)]
struct SlidingState {
    estimate: Extremes,
    seeded: bool,
}

impl SlidingState {
    fn update(&mut self, x: f64, alpha: f64) -> Extremes {
        if !self.seeded {
            self.estimate = Extremes { min: x, max: x };
            self.seeded = true;
        } else {
            let e = &mut self.estimate;
            e.min = x.min(e.min + alpha * (x - e.min));
            e.max = x.max(e.max + alpha * (x - e.max));
        }
        self.estimate
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    Moving(Vec<BlockState>),
    Sliding { alpha: f64, states: Vec<SlidingState> },
}

/// Moving minimum and/or maximum per channel
#[derive(Debug, Clone)]
pub struct MvgMinMax {
    options: MvgMinMaxOptions,
    strategy: Option<Strategy>,
    scratch_in: Vec<f64>,
    scratch_out: Vec<f64>,
}

impl MvgMinMax {
    pub fn new(options: MvgMinMaxOptions) -> Self {
        Self {
            options,
            strategy: None,
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }
}

impl Transformer for MvgMinMax {
    fn name(&self) -> &'static str {
        "mvgminmax"
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
            return Err(invalid("window", self.options.window, "positive length in seconds"));
        }
        if self.options.number_of_blocks == 0 {
            return Err(invalid("number_of_blocks", 0, "at least one block"));
        }
        let n = window_samples(self.options.window, input.sr());
        let blocks = self.options.number_of_blocks;
        self.strategy = Some(match self.options.method {
            MovingMethod::Moving => {
                let block_len = (n / blocks).max(1);
                log::debug!("[MVGMINMAX] {} blocks of {} samples", blocks, block_len);
                Strategy::Moving(vec![BlockState::new(block_len, blocks); input.dim()])
            }
            MovingMethod::Sliding => Strategy::Sliding {
                alpha: decay_alpha(n),
                states: vec![
                    SlidingState {
                        estimate: Extremes::EMPTY,
                        seeded: false,
                    };
                    input.dim()
                ],
            },
        });
        Ok(())
    }

    fn transform(&mut self, inputs: &[&Stream], output: &mut Stream) -> Result<()> {
        let input = primary_stream(self.name(), inputs)?;
        let dim = input.dim();
        input.copy_to_f64(&mut self.scratch_in)?;
        self.scratch_out.clear();

        let Some(strategy) = self.strategy.as_mut() else {
            return Err(invalid("mvgminmax", "not entered", "enter before transform"));
        };
        let format = self.options.format;

        for frame in self.scratch_in.chunks_exact(dim) {
            for (ch, &x) in frame.iter().enumerate() {
                let e = match strategy {
                    Strategy::Moving(states) => states[ch].update(x),
                    Strategy::Sliding { alpha, states } => states[ch].update(x, *alpha),
                };
                match format {
                    MinMaxFormat::Min => self.scratch_out.push(e.min),
                    MinMaxFormat::Max => self.scratch_out.push(e.max),
                    MinMaxFormat::Both => self.scratch_out.extend([e.min, e.max]),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_util::run_chunked;

    fn options(method: MovingMethod, window: f64, blocks: usize) -> MvgMinMaxOptions {
        MvgMinMaxOptions {
            method,
            format: MinMaxFormat::Both,
            window,
            number_of_blocks: blocks,
        }
    }

    #[test]
    fn test_blocks_forget_old_extremes() {
        // Window 4 samples, 2 blocks of 2
        let input = [9.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let op = MvgMinMax::new(options(MovingMethod::Moving, 0.4, 2));
        let out = run_chunked(Box::new(op), &input, 1, 10.0, &[8]);
        let max: Vec<f64> = out.chunks(2).map(|p| p[1]).collect();
        assert_eq!(max[0], 9.0);
        assert_eq!(max[3], 9.0);
        assert_eq!(max[5], 9.0);
        // Block [9, 1] is overwritten once two newer blocks are committed
        assert_eq!(max[6], 6.0);
        assert_eq!(max[7], 7.0);
        let min: Vec<f64> = out.chunks(2).map(|p| p[0]).collect();
        assert_eq!(min[5], 1.0);
        assert_eq!(min[7], 2.0);
    }

    #[test]
    fn test_sliding_never_crosses_newest_sample() {
        let input = [0.0, 10.0, -10.0, 5.0];
        let op = MvgMinMax::new(options(MovingMethod::Sliding, 0.5, 1));
        let out = run_chunked(Box::new(op), &input, 1, 10.0, &[4]);
        for (i, pair) in out.chunks(2).enumerate() {
            assert!(pair[0] <= input[i] && pair[1] >= input[i]);
        }
        assert_eq!(out[3], 10.0);
        assert_eq!(out[4], -10.0);
    }

    #[test]
    fn test_chunk_invariance() {
        let input: Vec<f64> = (0..90).map(|i| ((i * 29) % 13) as f64).collect();
        for method in [MovingMethod::Moving, MovingMethod::Sliding] {
            let make = || Box::new(MvgMinMax::new(options(method, 1.2, 3)));
            let whole = run_chunked(make(), &input, 2, 10.0, &[45]);
            let split = run_chunked(make(), &input, 2, 10.0, &[4, 4, 30, 7]);
            assert_eq!(whole, split);
        }
    }

    #[test]
    fn test_zero_blocks_rejected() {
        let mut runner = crate::transform::TransformerRunner::new(Box::new(MvgMinMax::new(
            options(MovingMethod::Moving, 1.0, 0),
        )));
        let input = Stream::from_f64(vec![1.0], 1, 10.0, 0.0).unwrap();
        assert!(runner.process(&[&input]).is_err());
    }
}
