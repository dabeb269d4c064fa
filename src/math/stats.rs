//! Probability and moment helpers

use super::VARIANCE_FLOOR;

/// Rescale `values` in place so they sum to one
///
/// A vector whose sum is zero or not finite is replaced by the uniform
/// distribution.
pub fn normalize_probabilities(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let sum: f64 = values.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        for v in values.iter_mut() {
            *v /= sum;
        }
    } else {
        let uniform = 1.0 / values.len() as f64;
        values.iter_mut().for_each(|v| *v = uniform);
    }
}

/// Turn log-scores into probabilities in place
///
/// Scores of `-inf` become zero. If no score is finite the result is uniform.
pub fn softmax(scores: &mut [f64]) {
    let max = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);

    if !max.is_finite() {
        for s in scores.iter_mut() {
            *s = if *s == f64::INFINITY { 1.0 } else { 0.0 };
        }
        normalize_probabilities(scores);
        return;
    }

    for s in scores.iter_mut() {
        *s = if s.is_nan() { 0.0 } else { (*s - max).exp() };
    }
    normalize_probabilities(scores);
}

/// Shannon entropy `-Σ p ln p` of a distribution (zero entries skipped)
pub fn entropy(probabilities: &[f64]) -> f64 {
    -probabilities
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.ln())
        .sum::<f64>()
}

/// Population mean and variance of `values`
pub fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Variance safe to use as a divisor
#[inline]
pub fn floor_variance(variance: f64) -> f64 {
    if variance > VARIANCE_FLOOR {
        variance
    } else {
        VARIANCE_FLOOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_normalize_zero_sum_is_uniform() {
        let mut p = vec![0.0; 4];
        normalize_probabilities(&mut p);
        assert_eq!(p, vec![0.25; 4]);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut s = vec![-1000.0, -1001.0, f64::NEG_INFINITY];
        softmax(&mut s);
        assert_abs_diff_eq!(s.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(s[0] > s[1]);
        assert_eq!(s[2], 0.0);
    }

    #[test]
    fn test_softmax_all_negative_infinity() {
        let mut s = vec![f64::NEG_INFINITY; 3];
        softmax(&mut s);
        assert_abs_diff_eq!(s[0], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_entropy_of_uniform() {
        let p = vec![0.25; 4];
        assert_abs_diff_eq!(entropy(&p), 4.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(entropy(&[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_floor_variance() {
        assert_eq!(floor_variance(0.0), VARIANCE_FLOOR);
        assert_eq!(floor_variance(2.0), 2.0);
    }
}
