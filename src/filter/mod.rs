//! Filter design
//!
//! Stateless design routines: Butterworth second-order sections, window
//! functions and filterbank matrices. Nothing here holds state between calls.

pub mod design;
pub mod filterbank;
pub mod window;

pub use design::{
    bandpass, butterworth, center_frequency, frequency_response, highpass, lowpass, FilterType,
    Section, SosTable,
};
pub use filterbank::{filterbank, linear_intervals};
pub use window::WindowType;
