//! Destinations for streamed trace data
//!
//! The iterator hands out chunks of the buffer; a sink takes as much of a
//! chunk as it can and reports the rest back. A non-zero residual stops
//! the iteration without losing position.

use std::io::{self, Write};

/// Consumer of buffer chunks
pub trait ChunkSink {
    /// Take bytes from `chunk`, returning how many were NOT taken
    fn consume(&mut self, chunk: &[u8]) -> usize;
}

impl ChunkSink for Vec<u8> {
    fn consume(&mut self, chunk: &[u8]) -> usize {
        self.extend_from_slice(chunk);
        0
    }
}

impl<S: ChunkSink + ?Sized> ChunkSink for &mut S {
    fn consume(&mut self, chunk: &[u8]) -> usize {
        (**self).consume(chunk)
    }
}

/// Fills a caller-provided slice
pub struct SliceSink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far
    pub fn filled(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl ChunkSink for SliceSink<'_> {
    fn consume(&mut self, chunk: &[u8]) -> usize {
        let n = chunk.len().min(self.remaining());
        self.buf[self.pos..self.pos + n].copy_from_slice(&chunk[..n]);
        self.pos += n;
        chunk.len() - n
    }
}

/// Adapter for `io::Write` destinations.
///
/// The first write error stops consumption and is kept for the caller.
pub struct WriteSink<W: Write> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: Write> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    /// Error that stopped the sink, if any
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ChunkSink for WriteSink<W> {
    fn consume(&mut self, chunk: &[u8]) -> usize {
        if self.error.is_some() {
            return chunk.len();
        }
        match self.inner.write_all(chunk) {
            Ok(()) => 0,
            Err(e) => {
                self.error = Some(e);
                chunk.len()
            }
        }
    }
}

/// Closure sink: `FnSink(|chunk| residual)`
pub struct FnSink<F>(pub F);

impl<F: FnMut(&[u8]) -> usize> ChunkSink for FnSink<F> {
    fn consume(&mut self, chunk: &[u8]) -> usize {
        (self.0)(chunk)
    }
}
