//! Overlapping frame extraction with carry-over between chunks

use super::SpectralOptions;

/// Cuts sample-major input into windowed frames, channel by channel
#[derive(Debug, Clone)]
pub(crate) struct Framer {
    frame: usize,
    hop: usize,
    dim: usize,
    window: Vec<f64>,
    /// Last `frame` samples per channel, channel-major
    history: Vec<f64>,
    windowed: Vec<f64>,
}

impl Framer {
    pub fn new(options: &SpectralOptions, dim: usize) -> Self {
        Self {
            frame: options.frame,
            hop: options.hop,
            dim,
            window: options.window.generate(options.frame),
            history: vec![0.0; options.frame * dim],
            windowed: vec![0.0; options.frame],
        }
    }

    /// Call `f(channel, windowed_frame)` for every hop of `samples`
    ///
    /// Frames are visited in time order, channels ascending within a frame.
    /// A trailing partial hop is ignored.
    pub fn for_each_frame<F>(&mut self, samples: &[f64], mut f: F)
    where
        F: FnMut(usize, &[f64]),
    {
        let (frame, hop, dim) = (self.frame, self.hop, self.dim);
        for block in samples.chunks_exact(hop * dim) {
            for ch in 0..dim {
                let history = &mut self.history[ch * frame..(ch + 1) * frame];
                history.copy_within(hop.., 0);
                for (i, dst) in history[frame - hop..].iter_mut().enumerate() {
                    *dst = block[i * dim + ch];
                }
                for ((dst, &x), &w) in self.windowed.iter_mut().zip(history.iter()).zip(&self.window)
                {
                    *dst = x * w;
                }
                f(ch, &self.windowed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::WindowType;

    #[test]
    fn test_frames_overlap_across_calls() {
        let options = SpectralOptions {
            frame: 4,
            hop: 2,
            window: WindowType::Rectangular,
        };
        let mut framer = Framer::new(&options, 1);
        let mut frames = Vec::new();
        framer.for_each_frame(&[1.0, 2.0], |_, f| frames.push(f.to_vec()));
        framer.for_each_frame(&[3.0, 4.0, 5.0, 6.0], |_, f| frames.push(f.to_vec()));
        assert_eq!(
            frames,
            vec![
                vec![0.0, 0.0, 1.0, 2.0],
                vec![1.0, 2.0, 3.0, 4.0],
                vec![3.0, 4.0, 5.0, 6.0],
            ]
        );
    }

    #[test]
    fn test_channels_are_separate() {
        let options = SpectralOptions {
            frame: 2,
            hop: 2,
            window: WindowType::Rectangular,
        };
        let mut framer = Framer::new(&options, 2);
        let mut frames = Vec::new();
        framer.for_each_frame(&[1.0, 10.0, 2.0, 20.0], |ch, f| frames.push((ch, f.to_vec())));
        assert_eq!(frames, vec![(0, vec![1.0, 2.0]), (1, vec![10.0, 20.0])]);
    }
}
