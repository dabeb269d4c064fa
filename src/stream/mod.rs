//! Stream types
//!
//! - `SampleType`: element kind of a stream
//! - `Stream`: a timestamped chunk of `num` x `dim` samples
//! - `StreamShape`: the static shape negotiated before data flows
//! - `Provider`: source of raw chunks

mod buffer;
mod provider;
mod sample_type;

pub use buffer::{Stream, StreamData, StreamShape};
pub use provider::{ChunkedSource, Provider};
pub use sample_type::SampleType;
