//! Stream buffer
//!
//! The shared data currency between operators: `num` samples of `dim`
//! channels of one element kind, stored sample-major (all channels of
//! sample 0, then sample 1, ...).

use super::SampleType;
use crate::error::{Result, SigstreamError};
use num_traits::{NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};

// ============================================================================
// Shape
// ============================================================================

/// Static shape of a stream, used for negotiation before data flows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamShape {
    /// Samples per chunk
    pub num: usize,
    /// Channels per sample
    pub dim: usize,
    /// Bytes per element
    pub bytes: usize,
    /// Element kind
    pub sample_type: SampleType,
    /// Sample rate in Hz
    pub sr: f64,
}

impl StreamShape {
    /// Shape of a stream of a built-in element kind
    pub fn new(num: usize, dim: usize, sr: f64, sample_type: SampleType) -> Self {
        Self {
            num,
            dim,
            bytes: sample_type.size().unwrap_or(1),
            sample_type,
            sr,
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Type-homogeneous element storage
#[derive(Debug, Clone, PartialEq)]
pub enum StreamData {
    Bool(Vec<bool>),
    Byte(Vec<u8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    /// Raw records, `bytes` wide each
    Custom(Vec<u8>),
}

impl StreamData {
    fn zeroed(sample_type: SampleType, len: usize, bytes: usize) -> Self {
        match sample_type {
            SampleType::Bool => StreamData::Bool(vec![false; len]),
            SampleType::Byte => StreamData::Byte(vec![0; len]),
            SampleType::Char => StreamData::Char(vec![0; len]),
            SampleType::Short => StreamData::Short(vec![0; len]),
            SampleType::Int => StreamData::Int(vec![0; len]),
            SampleType::Long => StreamData::Long(vec![0; len]),
            SampleType::Float => StreamData::Float(vec![0.0; len]),
            SampleType::Double => StreamData::Double(vec![0.0; len]),
            SampleType::Custom => StreamData::Custom(vec![0; len * bytes]),
        }
    }

    fn resize(&mut self, len: usize, bytes: usize) {
        match self {
            StreamData::Bool(v) => v.resize(len, false),
            StreamData::Byte(v) => v.resize(len, 0),
            StreamData::Char(v) => v.resize(len, 0),
            StreamData::Short(v) => v.resize(len, 0),
            StreamData::Int(v) => v.resize(len, 0),
            StreamData::Long(v) => v.resize(len, 0),
            StreamData::Float(v) => v.resize(len, 0.0),
            StreamData::Double(v) => v.resize(len, 0.0),
            StreamData::Custom(v) => v.resize(len * bytes, 0),
        }
    }
}

#[inline]
fn cast_or_zero<T: NumCast + Default>(value: f64) -> T {
    <T as NumCast>::from(value).unwrap_or_default()
}

#[inline]
fn to_f64_or_nan<T: ToPrimitive>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

// ============================================================================
// Stream
// ============================================================================

/// A chunk of timestamped multi-channel samples
///
/// # Example
/// ```
/// use sigstream::stream::{SampleType, Stream};
///
/// let mut stream = Stream::new(4, 2, 50.0, 0.0, SampleType::Float);
/// stream.as_f32_mut().unwrap()[1] = 3.0;
/// assert_eq!(stream.value(1), Some(3.0));
/// assert_eq!(stream.duration(), 4.0 / 50.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    num: usize,
    dim: usize,
    bytes: usize,
    sample_type: SampleType,
    sr: f64,
    /// Start timestamp in seconds
    time: f64,
    labels: Vec<String>,
    data: StreamData,
}

impl Stream {
    /// Create a zero-filled stream of a built-in element kind
    ///
    /// For [`SampleType::Custom`] the element width defaults to one byte;
    /// use [`Stream::custom`] to declare the record width.
    pub fn new(num: usize, dim: usize, sr: f64, time: f64, sample_type: SampleType) -> Self {
        let bytes = sample_type.size().unwrap_or(1);
        Self {
            num,
            dim,
            bytes,
            sample_type,
            sr,
            time,
            labels: default_labels(dim),
            data: StreamData::zeroed(sample_type, num * dim, bytes),
        }
    }

    /// Create a zero-filled stream of opaque records `bytes` wide
    pub fn custom(num: usize, dim: usize, bytes: usize, sr: f64, time: f64) -> Self {
        Self {
            num,
            dim,
            bytes,
            sample_type: SampleType::Custom,
            sr,
            time,
            labels: default_labels(dim),
            data: StreamData::Custom(vec![0; num * dim * bytes]),
        }
    }

    /// Allocate a zero-filled stream of the given shape
    pub fn from_shape(shape: &StreamShape, time: f64) -> Self {
        if shape.sample_type == SampleType::Custom {
            Self::custom(shape.num, shape.dim, shape.bytes, shape.sr, time)
        } else {
            Self::new(shape.num, shape.dim, shape.sr, time, shape.sample_type)
        }
    }

    /// Wrap existing `f32` samples (sample-major, `values.len()` must be a
    /// multiple of `dim`)
    pub fn from_f32(values: Vec<f32>, dim: usize, sr: f64, time: f64) -> Result<Self> {
        let num = checked_num(values.len(), dim)?;
        Ok(Self {
            num,
            dim,
            bytes: 4,
            sample_type: SampleType::Float,
            sr,
            time,
            labels: default_labels(dim),
            data: StreamData::Float(values),
        })
    }

    /// Wrap existing `f64` samples (sample-major)
    pub fn from_f64(values: Vec<f64>, dim: usize, sr: f64, time: f64) -> Result<Self> {
        let num = checked_num(values.len(), dim)?;
        Ok(Self {
            num,
            dim,
            bytes: 8,
            sample_type: SampleType::Double,
            sr,
            time,
            labels: default_labels(dim),
            data: StreamData::Double(values),
        })
    }

    // ------------------------------------------------------------------------
    // Shape accessors
    // ------------------------------------------------------------------------

    #[inline]
    pub fn num(&self) -> usize {
        self.num
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    #[inline]
    pub fn sr(&self) -> f64 {
        self.sr
    }

    /// Start timestamp in seconds
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// Total number of elements (`num * dim`)
    #[inline]
    pub fn total(&self) -> usize {
        self.num * self.dim
    }

    /// Duration covered by this chunk in seconds
    pub fn duration(&self) -> f64 {
        if self.sr <= 0.0 {
            return 0.0;
        }
        self.num as f64 / self.sr
    }

    pub fn shape(&self) -> StreamShape {
        StreamShape {
            num: self.num,
            dim: self.dim,
            bytes: self.bytes,
            sample_type: self.sample_type,
            sr: self.sr,
        }
    }

    /// One descriptive label per channel
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn set_labels(&mut self, labels: Vec<String>) -> Result<()> {
        if labels.len() != self.dim {
            return Err(SigstreamError::ShapeMismatch {
                component: "stream".to_string(),
                reason: format!("{} labels for {} channels", labels.len(), self.dim),
            });
        }
        self.labels = labels;
        Ok(())
    }

    pub fn data(&self) -> &StreamData {
        &self.data
    }

    /// Change the sample count, keeping the leading samples
    pub fn resize(&mut self, num: usize) {
        self.num = num;
        self.data.resize(num * self.dim, self.bytes);
    }

    // ------------------------------------------------------------------------
    // Typed access
    // ------------------------------------------------------------------------

    pub fn as_f32(&self) -> Result<&[f32]> {
        match &self.data {
            StreamData::Float(v) => Ok(v),
            _ => Err(self.type_error(SampleType::Float)),
        }
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        if !matches!(self.data, StreamData::Float(_)) {
            return Err(self.type_error(SampleType::Float));
        }
        match &mut self.data {
            StreamData::Float(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub fn as_f64(&self) -> Result<&[f64]> {
        match &self.data {
            StreamData::Double(v) => Ok(v),
            _ => Err(self.type_error(SampleType::Double)),
        }
    }

    pub fn as_f64_mut(&mut self) -> Result<&mut [f64]> {
        if !matches!(self.data, StreamData::Double(_)) {
            return Err(self.type_error(SampleType::Double));
        }
        match &mut self.data {
            StreamData::Double(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub fn as_i32(&self) -> Result<&[i32]> {
        match &self.data {
            StreamData::Int(v) => Ok(v),
            _ => Err(self.type_error(SampleType::Int)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match &self.data {
            StreamData::Byte(v) | StreamData::Custom(v) => Ok(v),
            _ => Err(self.type_error(SampleType::Byte)),
        }
    }

    /// Element `index` converted to `f64`
    ///
    /// Returns `None` for out-of-range indices and for custom records.
    pub fn value(&self, index: usize) -> Option<f64> {
        if index >= self.total() {
            return None;
        }
        Some(match &self.data {
            StreamData::Bool(v) => {
                if v[index] {
                    1.0
                } else {
                    0.0
                }
            }
            StreamData::Byte(v) => to_f64_or_nan(v[index]),
            StreamData::Char(v) => to_f64_or_nan(v[index]),
            StreamData::Short(v) => to_f64_or_nan(v[index]),
            StreamData::Int(v) => to_f64_or_nan(v[index]),
            StreamData::Long(v) => to_f64_or_nan(v[index]),
            StreamData::Float(v) => to_f64_or_nan(v[index]),
            StreamData::Double(v) => v[index],
            StreamData::Custom(_) => return None,
        })
    }

    /// Store `value` at element `index`, converting to the element kind
    ///
    /// Values that do not fit an integer kind are stored as zero.
    pub fn set_value(&mut self, index: usize, value: f64) -> Result<()> {
        if index >= self.total() {
            return Err(SigstreamError::ShapeMismatch {
                component: "stream".to_string(),
                reason: format!("index {} out of range for {} elements", index, self.total()),
            });
        }
        match &mut self.data {
            StreamData::Bool(v) => v[index] = value != 0.0,
            StreamData::Byte(v) => v[index] = cast_or_zero(value),
            StreamData::Char(v) => v[index] = cast_or_zero(value),
            StreamData::Short(v) => v[index] = cast_or_zero(value),
            StreamData::Int(v) => v[index] = cast_or_zero(value),
            StreamData::Long(v) => v[index] = cast_or_zero(value),
            StreamData::Float(v) => v[index] = value as f32,
            StreamData::Double(v) => v[index] = value,
            StreamData::Custom(_) => return Err(self.type_error(SampleType::Double)),
        }
        Ok(())
    }

    /// All elements of sample `index` as `f64`
    pub fn sample(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.num {
            return None;
        }
        let start = index * self.dim;
        (start..start + self.dim).map(|i| self.value(i)).collect()
    }

    /// Copy all elements into `out` as `f64` (cleared first)
    pub fn copy_to_f64(&self, out: &mut Vec<f64>) -> Result<()> {
        out.clear();
        match &self.data {
            StreamData::Float(v) => out.extend(v.iter().map(|&x| x as f64)),
            StreamData::Double(v) => out.extend_from_slice(v),
            StreamData::Custom(_) => return Err(self.type_error(SampleType::Double)),
            _ => out.extend((0..self.total()).filter_map(|i| self.value(i))),
        }
        Ok(())
    }

    /// Overwrite all elements from `values`, converting to the element kind
    pub fn copy_from_f64(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.total() {
            return Err(SigstreamError::ShapeMismatch {
                component: "stream".to_string(),
                reason: format!(
                    "{} values written into {} elements",
                    values.len(),
                    self.total()
                ),
            });
        }
        match &mut self.data {
            StreamData::Float(v) => {
                for (dst, &src) in v.iter_mut().zip(values) {
                    *dst = src as f32;
                }
            }
            StreamData::Double(v) => v.copy_from_slice(values),
            _ => {
                for (i, &value) in values.iter().enumerate() {
                    self.set_value(i, value)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived streams
    // ------------------------------------------------------------------------

    /// Samples whose timestamps fall in `[from, to)` seconds
    ///
    /// The interval is clamped to the stream; an empty stream is returned if
    /// it does not overlap.
    pub fn sub_range(&self, from: f64, to: f64) -> Stream {
        let first = ((from - self.time) * self.sr).round().max(0.0) as usize;
        let last = ((to - self.time) * self.sr).round().max(0.0) as usize;
        let first = first.min(self.num);
        let last = last.clamp(first, self.num);

        let mut sub = self.clone();
        let (start, end) = (first * self.dim, last * self.dim);
        sub.data = match &self.data {
            StreamData::Bool(v) => StreamData::Bool(v[start..end].to_vec()),
            StreamData::Byte(v) => StreamData::Byte(v[start..end].to_vec()),
            StreamData::Char(v) => StreamData::Char(v[start..end].to_vec()),
            StreamData::Short(v) => StreamData::Short(v[start..end].to_vec()),
            StreamData::Int(v) => StreamData::Int(v[start..end].to_vec()),
            StreamData::Long(v) => StreamData::Long(v[start..end].to_vec()),
            StreamData::Float(v) => StreamData::Float(v[start..end].to_vec()),
            StreamData::Double(v) => StreamData::Double(v[start..end].to_vec()),
            StreamData::Custom(v) => {
                StreamData::Custom(v[start * self.bytes..end * self.bytes].to_vec())
            }
        };
        sub.num = last - first;
        if self.sr > 0.0 {
            sub.time = self.time + first as f64 / self.sr;
        }
        sub
    }

    /// Gather the given channels into a new stream of the same element kind
    pub fn select(&self, channels: &[usize]) -> Result<Stream> {
        if let Some(&bad) = channels.iter().find(|&&c| c >= self.dim) {
            return Err(SigstreamError::ShapeMismatch {
                component: "stream".to_string(),
                reason: format!("channel {} out of range for dim {}", bad, self.dim),
            });
        }
        if self.sample_type == SampleType::Custom {
            return Err(self.type_error(SampleType::Double));
        }
        let mut out = Stream::new(self.num, channels.len(), self.sr, self.time, self.sample_type);
        for i in 0..self.num {
            for (j, &c) in channels.iter().enumerate() {
                let value = self.value(i * self.dim + c).unwrap_or(0.0);
                out.set_value(i * channels.len() + j, value)?;
            }
        }
        out.labels = channels.iter().map(|&c| self.labels[c].clone()).collect();
        Ok(out)
    }

    fn type_error(&self, expected: SampleType) -> SigstreamError {
        SigstreamError::UnsupportedType {
            component: "stream".to_string(),
            expected: expected.to_string(),
            found: self.sample_type.to_string(),
        }
    }
}

fn default_labels(dim: usize) -> Vec<String> {
    (0..dim).map(|i| format!("dim{}", i)).collect()
}

fn checked_num(len: usize, dim: usize) -> Result<usize> {
    if dim == 0 || len % dim != 0 {
        return Err(SigstreamError::ShapeMismatch {
            component: "stream".to_string(),
            reason: format!("{} values cannot be split into samples of dim {}", len, dim),
        });
    }
    Ok(len / dim)
}
