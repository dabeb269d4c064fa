//! Complex-plane helpers for IIR design

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

/// Pole `k` of an order-`order` analog Butterworth prototype
///
/// Poles lie on the unit circle in the left half plane:
/// `exp(i·π·(2k + n + 1) / 2n)`.
pub fn unit_circle_pole(k: usize, order: usize) -> Complex64 {
    let n = order as f64;
    let theta = PI * (2.0 * k as f64 + n + 1.0) / (2.0 * n);
    Complex64::from_polar(1.0, theta)
}

/// Bilinear transform of an s-plane point to the z-plane: `(1 + s) / (1 - s)`
#[inline]
pub fn bilinear(s: Complex64) -> Complex64 {
    (Complex64::new(1.0, 0.0) + s) / (Complex64::new(1.0, 0.0) - s)
}

/// Denominator `[1, a1, a2]` of a section holding the pole pair `z`, `conj(z)`
#[inline]
pub fn conjugate_section(z: Complex64) -> [f64; 3] {
    [1.0, -2.0 * z.re, z.norm_sqr()]
}

/// Denominator `[1, a1, 0]` of a first-order section with real pole `z`
#[inline]
pub fn real_section(z: f64) -> [f64; 3] {
    [1.0, -z, 0.0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_poles_in_left_half_plane() {
        for order in 1..=8 {
            for k in 0..order {
                let p = unit_circle_pole(k, order);
                assert!(p.re < 1e-12, "pole {} of order {} not stable: {}", k, order, p);
                assert_abs_diff_eq!(p.norm(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_bilinear_maps_into_unit_disk() {
        let z = bilinear(Complex64::new(-0.5, 0.3));
        assert!(z.norm() < 1.0);
        assert_abs_diff_eq!(bilinear(Complex64::new(0.0, 0.0)).re, 1.0);
    }

    #[test]
    fn test_conjugate_section() {
        let z = Complex64::from_polar(0.5, 0.25);
        let [a0, a1, a2] = conjugate_section(z);
        assert_eq!(a0, 1.0);
        assert_abs_diff_eq!(a1, -2.0 * 0.5 * 0.25_f64.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(a2, 0.25, epsilon = 1e-12);
    }
}
