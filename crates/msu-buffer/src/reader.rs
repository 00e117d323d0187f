//! Streaming reader sessions
//!
//! A reader pins the buffer with a usage reference and walks it oldest
//! data first. Capture and readers exclude each other: a reader cannot
//! attach while capture runs, and capture cannot start while a reader is
//! attached.

use std::io::{self, Read, Write};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use msu_core::constants::PAGE_SIZE;
use msu_core::{Mode, MscError, MscRegisters, Result};

use crate::iter::MscIter;
use crate::msc::Msc;
use crate::sink::{ChunkSink, SliceSink, WriteSink};
use crate::window::TraceBuffer;

impl<R: MscRegisters> Msc<R> {
    /// Attach a reader to the current buffer
    pub fn open(&self) -> Result<MscReader<'_, R>> {
        let mut inner = self.lock();
        if self.is_enabled() {
            return Err(MscError::Busy);
        }

        self.usage.acquire()?;
        let Some(buffer) = inner.buffer.clone() else {
            self.usage.release();
            return Err(MscError::NotReady);
        };
        inner.readers += 1;

        log::debug!("reader attached ({} total)", inner.readers);
        Ok(MscReader {
            msc: self,
            buffer,
            iter: MscIter::new(),
            pos: 0,
        })
    }
}

/// One read session over a stopped buffer
pub struct MscReader<'a, R: MscRegisters> {
    msc: &'a Msc<R>,
    buffer: Arc<TraceBuffer>,
    iter: MscIter,
    pos: u64,
}

impl<R: MscRegisters> MscReader<'_, R> {
    /// Stream position
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn buffer(&self) -> &TraceBuffer {
        &self.buffer
    }

    /// Upper bound of the stream
    fn size(&self) -> usize {
        if self.buffer.mode() == Mode::Single && !self.msc.single_wrap.load(Ordering::Acquire) {
            self.msc.single_sz.load(Ordering::Acquire)
        } else {
            self.buffer.len()
        }
    }

    /// Copy up to `len` bytes of trace into `sink`.
    ///
    /// Returns the bytes produced; 0 at end of data. A sink that leaves a
    /// residual ends the call early, and the next call resumes there.
    pub fn read_into<S: ChunkSink + ?Sized>(&mut self, sink: &mut S, len: usize) -> usize {
        let size = self.size();
        let off = self.pos as usize;
        if size == 0 || off >= size {
            return 0;
        }
        let len = len.min(size - off);

        match self.buffer.mode() {
            Mode::Single => {
                let single_sz = self.msc.single_sz.load(Ordering::Acquire);
                let wrapped = self.msc.single_wrap.load(Ordering::Acquire);
                let n = single_copy(&self.buffer, single_sz, wrapped, off, len, sink);
                self.pos += n as u64;
                n
            }
            _ => {
                let marker = self.msc.marker();
                let n = self.iter.iterate(self.buffer.windows(), marker, len, sink);
                self.pos = self.iter.offset();
                n
            }
        }
    }

    /// Drain everything left into `out`
    pub fn copy_to<W: Write>(&mut self, out: W) -> io::Result<u64> {
        let mut sink = WriteSink::new(out);
        let mut total = 0u64;
        loop {
            let n = self.read_into(&mut sink, usize::MAX);
            total += n as u64;
            if let Some(e) = sink.take_error() {
                return Err(e);
            }
            if n == 0 {
                break;
            }
        }
        sink.into_inner().flush()?;
        Ok(total)
    }
}

impl<R: MscRegisters> Read for MscReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        let mut sink = SliceSink::new(buf);
        Ok(self.read_into(&mut sink, len))
    }
}

impl<R: MscRegisters> Drop for MscReader<'_, R> {
    fn drop(&mut self) {
        let mut inner = self.msc.lock();
        inner.readers = inner.readers.saturating_sub(1);
        drop(inner);
        self.msc.usage.release();
    }
}

/// Copy from a single mode buffer, logical offset `off`.
///
/// After a wrap the oldest data starts at the write pointer: the tail
/// `[single_sz, size)` comes first, then the head `[0, single_sz)`.
fn single_copy<S: ChunkSink + ?Sized>(
    buf: &TraceBuffer,
    single_sz: usize,
    wrapped: bool,
    off: usize,
    len: usize,
    sink: &mut S,
) -> usize {
    let size = buf.len();
    let mut start = off;
    let mut rem = len;

    // page-sized copies; false once the sink leaves a residual
    let mut bounce = vec![0u8; PAGE_SIZE];
    let mut emit = |range: std::ops::Range<usize>, rem: &mut usize| -> bool {
        let mut pos = range.start;
        while pos < range.end {
            let chunk = &mut bounce[..(range.end - pos).min(PAGE_SIZE)];
            if !buf.copy_out(pos, chunk) {
                return false;
            }
            let residual = sink.consume(chunk).min(chunk.len());
            let copied = chunk.len() - residual;
            *rem -= copied;
            pos += copied;
            if residual > 0 {
                return false;
            }
        }
        true
    };

    if !wrapped {
        emit(start..start + rem, &mut rem);
        return len - rem;
    }

    start += single_sz;
    if start < size {
        let n = rem.min(size - start);
        if !emit(start..start + n, &mut rem) {
            return len - rem;
        }
        start += n;
    }
    start %= size;

    if rem > 0 {
        let n = rem.min(single_sz.saturating_sub(start));
        emit(start..start + n, &mut rem);
    }
    len - rem
}
