//! Filterbank matrices
//!
//! A filterbank maps the `fft_size / 2 + 1` magnitude bins of a frame onto
//! a smaller number of bands. Row `b` of the matrix holds the weights of band
//! `b` over all bins, so banked energies are a single matrix-vector product.

use super::WindowType;
use crate::error::{Result, SigstreamError};
use crate::math::Matrix;

/// Build a `bands x (fft_size/2 + 1)` weight matrix
///
/// # Arguments
/// * `fft_size` - frame length in samples
/// * `sr` - sample rate in Hz
/// * `intervals` - `(low, high)` band edges in Hz
/// * `shape` - weighting window laid over each band
///
/// Band edges outside `[0, sr/2]` are clamped to the available bins.
pub fn filterbank(
    fft_size: usize,
    sr: f64,
    intervals: &[(f64, f64)],
    shape: WindowType,
) -> Result<Matrix> {
    if fft_size < 2 || sr <= 0.0 {
        return Err(SigstreamError::InvalidParameter {
            param: "fft_size".to_string(),
            value: format!("{} at {} Hz", fft_size, sr),
            expected: "at least two samples and a positive sample rate".to_string(),
        });
    }
    let bins = fft_size / 2 + 1;
    let mut matrix = Matrix::zeros(intervals.len(), bins);

    for (row, &(low, high)) in intervals.iter().enumerate() {
        if !(low < high) {
            return Err(SigstreamError::InvalidParameter {
                param: "banks".to_string(),
                value: format!("[{}, {}]", low, high),
                expected: "low edge below high edge".to_string(),
            });
        }
        let from = bin_of(low, fft_size, sr, bins);
        let to = bin_of(high, fft_size, sr, bins).max(from);
        let width = to - from + 1;

        // Interior of a wider window so that neither edge bin gets zero weight
        let weights = shape.generate_symmetric(width + 2);
        for (j, &w) in weights[1..=width].iter().enumerate() {
            matrix[(row, from + j)] = w;
        }
    }

    Ok(matrix)
}

/// `count` contiguous bands of equal width covering `[min, max]` Hz
pub fn linear_intervals(count: usize, min: f64, max: f64) -> Vec<(f64, f64)> {
    if count == 0 || max <= min {
        return Vec::new();
    }
    let step = (max - min) / count as f64;
    (0..count)
        .map(|i| (min + step * i as f64, min + step * (i + 1) as f64))
        .collect()
}

fn bin_of(freq: f64, fft_size: usize, sr: f64, bins: usize) -> usize {
    let bin = (freq * fft_size as f64 / sr).round();
    if bin <= 0.0 {
        0
    } else {
        (bin as usize).min(bins - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangular_bank_covers_bins() {
        // 8-point FFT at 8 Hz: one bin per Hz, bins 0..=4
        let fb = filterbank(8, 8.0, &[(0.0, 1.0), (2.0, 4.0)], WindowType::Rectangular).unwrap();
        assert_eq!(fb.shape(), (2, 5));
        assert_eq!(fb.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(fb.row(1).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_edges_are_clamped() {
        let fb = filterbank(8, 8.0, &[(3.0, 100.0)], WindowType::Triangular).unwrap();
        assert!(fb[(0, 4)] > 0.0);
        assert!(fb[(0, 3)] > 0.0);
        assert_eq!(fb[(0, 2)], 0.0);
    }

    #[test]
    fn test_triangular_peaks_in_centre() {
        let fb = filterbank(16, 16.0, &[(2.0, 6.0)], WindowType::Triangular).unwrap();
        assert!(fb[(0, 4)] > fb[(0, 2)]);
        assert!(fb[(0, 4)] > fb[(0, 6)]);
    }

    #[test]
    fn test_invalid_interval() {
        assert!(filterbank(8, 8.0, &[(3.0, 3.0)], WindowType::Hamming).is_err());
        assert!(filterbank(1, 8.0, &[], WindowType::Hamming).is_err());
    }

    #[test]
    fn test_linear_intervals() {
        let iv = linear_intervals(4, 0.0, 8.0);
        assert_eq!(iv, vec![(0.0, 2.0), (2.0, 4.0), (4.0, 6.0), (6.0, 8.0)]);
        assert!(linear_intervals(0, 0.0, 1.0).is_empty());
    }
}
