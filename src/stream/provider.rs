//! Chunked sample sources

use super::{Stream, StreamShape};
use crate::error::{Result, SigstreamError};

/// A raw chunked sample source feeding the head of a pipeline
pub trait Provider: Send {
    /// Shape of the chunks this provider emits (`num` is the nominal chunk size)
    fn shape(&self) -> StreamShape;

    /// Next chunk, or `None` once the source is exhausted
    fn next_chunk(&mut self) -> Option<Stream>;
}

/// In-memory provider that replays a stream in caller-chosen chunk sizes
///
/// Chunk sizes cycle; each emitted chunk carries the timestamp of its first
/// sample.
#[derive(Debug, Clone)]
pub struct ChunkedSource {
    source: Stream,
    chunk_sizes: Vec<usize>,
    position: usize,
    next_size: usize,
}

impl ChunkedSource {
    /// Replay `source` in chunks of the given sizes
    pub fn new(source: Stream, chunk_sizes: Vec<usize>) -> Result<Self> {
        if chunk_sizes.is_empty() || chunk_sizes.contains(&0) {
            return Err(SigstreamError::InvalidParameter {
                param: "chunk_sizes".to_string(),
                value: format!("{:?}", chunk_sizes),
                expected: "one or more positive sizes".to_string(),
            });
        }
        Ok(Self {
            source,
            chunk_sizes,
            position: 0,
            next_size: 0,
        })
    }

    /// Replay `source` in equal chunks of `size` samples
    pub fn uniform(source: Stream, size: usize) -> Result<Self> {
        Self::new(source, vec![size])
    }

    /// Samples not yet emitted
    pub fn remaining(&self) -> usize {
        self.source.num() - self.position
    }
}

impl Provider for ChunkedSource {
    fn shape(&self) -> StreamShape {
        let mut shape = self.source.shape();
        shape.num = self.chunk_sizes[0];
        shape
    }

    fn next_chunk(&mut self) -> Option<Stream> {
        if self.remaining() == 0 {
            return None;
        }
        let size = self.chunk_sizes[self.next_size % self.chunk_sizes.len()];
        self.next_size += 1;

        let sr = self.source.sr();
        let start = self.source.time() + self.position as f64 / sr;
        let end = self.source.time() + (self.position + size) as f64 / sr;
        let mut chunk = self.source.sub_range(start, end);
        // Guard against rounding at the interval edges
        chunk.set_time(start);
        self.position += chunk.num();
        if chunk.num() == 0 {
            self.position = self.source.num();
            return None;
        }
        Some(chunk)
    }
}
