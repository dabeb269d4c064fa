//! Numeric helpers shared by filter design, spectral operators and models
//!
//! Stateless functions only; dense matrices come from `nalgebra` and complex
//! numbers from the `num_complex` crate re-exported by `rustfft`.

mod complex;
mod stats;

pub use complex::{bilinear, conjugate_section, real_section, unit_circle_pole};
pub use nalgebra::{DMatrix, DVector};
pub use rustfft::num_complex::Complex64;
pub use stats::{entropy, floor_variance, mean_and_variance, normalize_probabilities, softmax};

/// Smallest variance used as a divisor
pub const VARIANCE_FLOOR: f64 = f64::MIN_POSITIVE;

/// Floor applied before taking logarithms of energies
pub const LOG_FLOOR: f64 = 1e-10;

/// Dense matrix of `f64` (nalgebra, column-major storage)
pub type Matrix = DMatrix<f64>;
