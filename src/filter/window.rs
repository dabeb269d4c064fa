//! Window functions for spectral framing and filterbanks

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Window shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// No tapering
    Rectangular,
    /// Hann window (default)
    #[default]
    Hann,
    Hamming,
    Blackman,
    /// Linear rise to the centre and back
    Triangular,
}

impl WindowType {
    /// Periodic window of `size` coefficients, for FFT frames
    pub fn generate(&self, size: usize) -> Vec<f64> {
        self.coefficients(size, size as f64)
    }

    /// Symmetric window of `size` coefficients, peaking at the centre
    ///
    /// Used for filterbank weights, where both band edges must taper alike.
    pub fn generate_symmetric(&self, size: usize) -> Vec<f64> {
        if size <= 1 {
            return vec![1.0; size];
        }
        self.coefficients(size, (size - 1) as f64)
    }

    fn coefficients(&self, size: usize, period: f64) -> Vec<f64> {
        (0..size)
            .map(|i| {
                let n = i as f64 / period;
                match self {
                    WindowType::Rectangular => 1.0,
                    WindowType::Hann => 0.5 * (1.0 - (2.0 * PI * n).cos()),
                    WindowType::Hamming => 0.54 - 0.46 * (2.0 * PI * n).cos(),
                    WindowType::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * n).cos() + 0.08 * (4.0 * PI * n).cos()
                    }
                    WindowType::Triangular => 1.0 - (2.0 * n - 1.0).abs(),
                }
            })
            .collect()
    }

    /// Coherent gain: mean of the periodic window
    pub fn coherent_gain(&self, size: usize) -> f64 {
        if size == 0 {
            return 0.0;
        }
        self.generate(size).iter().sum::<f64>() / size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rectangular_is_flat() {
        assert_eq!(WindowType::Rectangular.generate(4), vec![1.0; 4]);
    }

    #[test]
    fn test_hann_starts_at_zero() {
        let w = WindowType::Hann.generate(8);
        assert_abs_diff_eq!(w[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[4], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(WindowType::Hann.coherent_gain(8), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetric_triangle() {
        let w = WindowType::Triangular.generate_symmetric(5);
        assert_eq!(w, vec![0.0, 0.5, 1.0, 0.5, 0.0]);
        assert_eq!(WindowType::Hamming.generate_symmetric(1), vec![1.0]);
    }
}
