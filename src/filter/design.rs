//! Butterworth filter design
//!
//! Coefficients are computed once, before data flows, and handed to the
//! [`Iir`](crate::transform::Iir) operator as a cascade of second-order
//! sections. All cutoff frequencies are normalised to the Nyquist frequency,
//! so they must lie strictly inside `(0, 1)`.

use crate::error::{Result, SigstreamError};
use crate::math::{bilinear, conjugate_section, real_section, unit_circle_pole, Complex64, Matrix};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Pass band of a designed filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Remove above the cutoff
    #[default]
    LowPass,
    /// Remove below the cutoff
    HighPass,
    /// Keep between the two cutoffs
    BandPass,
}

/// Second-order section coefficients
///
/// Transfer function: `H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)`.
/// First-order sections have `b2 == a2 == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Section {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Section {
    /// Build a section from numerator and denominator, normalising by `a0`
    pub fn from_coefficients(b: [f64; 3], a: [f64; 3]) -> Result<Self> {
        if a[0] == 0.0 || !a[0].is_finite() {
            return Err(SigstreamError::InvalidParameter {
                param: "a0".to_string(),
                value: a[0].to_string(),
                expected: "non-zero leading denominator coefficient".to_string(),
            });
        }
        Ok(Self {
            b0: b[0] / a[0],
            b1: b[1] / a[0],
            b2: b[2] / a[0],
            a1: a[1] / a[0],
            a2: a[2] / a[0],
        })
    }

    /// Complex response at normalised frequency `f` (1.0 = Nyquist)
    pub fn response(&self, f: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -PI * f);
        let z2 = z1 * z1;
        let num = Complex64::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex64::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;
        num / den
    }

    fn scaled(numerator: [f64; 3], denominator: [f64; 3], gain: f64) -> Self {
        Self {
            b0: numerator[0] * gain,
            b1: numerator[1] * gain,
            b2: numerator[2] * gain,
            a1: denominator[1],
            a2: denominator[2],
        }
    }
}

/// Fixed-size cascade of second-order sections
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SosTable {
    sections: Vec<Section>,
}

impl SosTable {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Read a `sections x 6` matrix with rows `[b0 b1 b2 a0 a1 a2]`
    pub fn from_matrix(matrix: &Matrix) -> Result<Self> {
        if matrix.ncols() != 6 || matrix.nrows() == 0 {
            return Err(SigstreamError::InvalidParameter {
                param: "coefficients".to_string(),
                value: format!("{}x{} matrix", matrix.nrows(), matrix.ncols()),
                expected: "one row [b0 b1 b2 a0 a1 a2] per section".to_string(),
            });
        }
        let sections = matrix
            .row_iter()
            .map(|row| {
                Section::from_coefficients([row[0], row[1], row[2]], [row[3], row[4], row[5]])
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sections })
    }

    /// Write the table as a `sections x 6` matrix with `a0 = 1`
    pub fn to_matrix(&self) -> Matrix {
        Matrix::from_fn(self.sections.len(), 6, |r, c| {
            let s = &self.sections[r];
            [s.b0, s.b1, s.b2, 1.0, s.a1, s.a2][c]
        })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Magnitude response of the whole cascade at normalised frequency `f`
    pub fn magnitude(&self, f: f64) -> f64 {
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(f))
            .norm()
    }
}

// ============================================================================
// Design
// ============================================================================

/// Design a Butterworth filter
///
/// # Arguments
/// * `filter_type` - pass band
/// * `order` - filter order; must be even for band-pass
/// * `low` - cutoff for low/high-pass, lower edge for band-pass
/// * `high` - upper edge for band-pass (ignored otherwise)
///
/// # Example
/// ```
/// use sigstream::filter::{butterworth, FilterType};
///
/// let sos = butterworth(FilterType::LowPass, 4, 0.25, 0.0).unwrap();
/// assert_eq!(sos.len(), 2);
/// assert!((sos.magnitude(0.0) - 1.0).abs() < 1e-9);
/// ```
pub fn butterworth(filter_type: FilterType, order: usize, low: f64, high: f64) -> Result<SosTable> {
    match filter_type {
        FilterType::LowPass => lowpass(order, low),
        FilterType::HighPass => highpass(order, low),
        FilterType::BandPass => bandpass(order, low, high),
    }
}

/// Low-pass sections with unit gain at DC
pub fn lowpass(order: usize, cutoff: f64) -> Result<SosTable> {
    check_order(order)?;
    let w = prewarp(cutoff, "cutoff")?;
    Ok(SosTable::new(design(order, |p| p * w, [1.0, 2.0, 1.0], [1.0, 1.0, 0.0], 1.0)))
}

/// High-pass sections with unit gain at Nyquist
pub fn highpass(order: usize, cutoff: f64) -> Result<SosTable> {
    check_order(order)?;
    let w = prewarp(cutoff, "cutoff")?;
    Ok(SosTable::new(design(
        order,
        |p| Complex64::new(w, 0.0) / p,
        [1.0, -2.0, 1.0],
        [1.0, -1.0, 0.0],
        -1.0,
    )))
}

/// Band-pass sections from an `order / 2` low-pass prototype
///
/// Every prototype pole `p` is shifted to the pair of roots of
/// `s^2 - p*B*s + w0^2` (`w0 = sqrt(wl*wh)`, `B = wh - wl`, both pre-warped),
/// giving `order` poles in `order / 2` sections. Each section holds one zero
/// at DC and one at Nyquist and has unit gain at the centre frequency, so the
/// cascade peaks at 1 and crosses `1/sqrt(2)` at both band edges.
pub fn bandpass(order: usize, low: f64, high: f64) -> Result<SosTable> {
    check_order(order)?;
    if order % 2 != 0 {
        return Err(SigstreamError::InvalidParameter {
            param: "order".to_string(),
            value: order.to_string(),
            expected: "even order for band-pass".to_string(),
        });
    }
    if low >= high {
        return Err(SigstreamError::InvalidParameter {
            param: "low".to_string(),
            value: format!("{} >= {}", low, high),
            expected: "low cutoff below high cutoff".to_string(),
        });
    }
    let wl = prewarp(low, "low")?;
    let wh = prewarp(high, "high")?;
    let w0_sq = wl * wh;
    let bandwidth = wh - wl;
    let centre = center_frequency(low, high);

    let mut upper = Vec::with_capacity(order / 2);
    let mut real = Vec::new();
    let prototype = order / 2;
    for k in 0..prototype {
        let pb = unit_circle_pole(k, prototype) * bandwidth;
        let root = (pb * pb - 4.0 * w0_sq).sqrt();
        for s in [(pb + root) / 2.0, (pb - root) / 2.0] {
            let z = bilinear(s);
            if z.im > 1e-12 {
                upper.push(z);
            } else if z.im.abs() <= 1e-12 {
                real.push(z.re);
            }
        }
    }

    let mut denominators: Vec<[f64; 3]> = upper.into_iter().map(conjugate_section).collect();
    for pair in real.chunks(2) {
        let den = match *pair {
            [a, b] => [1.0, -(a + b), a * b],
            [a] => real_section(a),
            _ => continue,
        };
        denominators.push(den);
    }

    let numerator = [1.0, 0.0, -1.0];
    let sections = denominators
        .into_iter()
        .map(|den| {
            let unscaled = Section::scaled(numerator, den, 1.0);
            Section::scaled(numerator, den, 1.0 / unscaled.response(centre).norm())
        })
        .collect();
    Ok(SosTable::new(sections))
}

/// Normalised centre frequency of a band-pass design: the image of the
/// geometric mean of the pre-warped edges
pub fn center_frequency(low: f64, high: f64) -> f64 {
    let w0 = ((PI * low / 2.0).tan() * (PI * high / 2.0).tan()).sqrt();
    2.0 * w0.atan() / PI
}

/// Magnitude of the cascade at each normalised frequency in `freqs`
pub fn frequency_response(sos: &SosTable, freqs: &[f64]) -> Vec<f64> {
    freqs.iter().map(|&f| sos.magnitude(f)).collect()
}

fn check_order(order: usize) -> Result<()> {
    if order == 0 {
        return Err(SigstreamError::InvalidParameter {
            param: "order".to_string(),
            value: "0".to_string(),
            expected: "order >= 1".to_string(),
        });
    }
    Ok(())
}

/// Tangent pre-warp of a Nyquist-normalised frequency for the bilinear transform
fn prewarp(f: f64, name: &str) -> Result<f64> {
    if !(f > 0.0 && f < 1.0) {
        return Err(SigstreamError::InvalidParameter {
            param: name.to_string(),
            value: f.to_string(),
            expected: "normalised frequency in (0, 1)".to_string(),
        });
    }
    Ok((PI * f / 2.0).tan())
}

/// Map prototype poles through `map` and the bilinear transform into sections
///
/// `unit_point` is where the gain is normalised to one (`+1` = DC,
/// `-1` = Nyquist).
fn design<F>(
    order: usize,
    map: F,
    pair_numerator: [f64; 3],
    single_numerator: [f64; 3],
    unit_point: f64,
) -> Vec<Section>
where
    F: Fn(Complex64) -> Complex64,
{
    let mut sections = Vec::with_capacity((order + 1) / 2);

    for k in 0..order / 2 {
        let z = bilinear(map(unit_circle_pole(k, order)));
        let den = conjugate_section(z);
        let gain = eval(den, unit_point) / eval(pair_numerator, unit_point);
        sections.push(Section::scaled(pair_numerator, den, gain));
    }

    if order % 2 == 1 {
        let z = bilinear(map(unit_circle_pole(order / 2, order))).re;
        let den = real_section(z);
        let gain = eval(den, unit_point) / eval(single_numerator, unit_point);
        sections.push(Section::scaled(single_numerator, den, gain));
    }

    sections
}

/// Evaluate `c0 + c1*z^-1 + c2*z^-2` at a real point `z = ±1`
fn eval(c: [f64; 3], z: f64) -> f64 {
    c[0] + c[1] / z + c[2] / (z * z)
}
