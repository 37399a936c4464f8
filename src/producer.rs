//! Turns a large in-memory byte source into a paced, pausable sequence of
//! bounded chunks.

use crate::{error::Result, stream::Stream};
use bytes::Bytes;
use std::ops::Range;

/// A contiguous byte buffer of known size that can hand out sub-slices.
pub trait ByteSource: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the bytes in `range`. The range is always within `0..len()`.
    fn slice(&self, range: Range<usize>) -> Bytes;
}

impl ByteSource for Bytes {
    fn len(&self) -> usize {
        Bytes::len(self)
    }

    fn slice(&self, range: Range<usize>) -> Bytes {
        Bytes::slice(self, range)
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn slice(&self, range: Range<usize>) -> Bytes {
        Bytes::copy_from_slice(&self[range])
    }
}

impl ByteSource for &'static [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn slice(&self, range: Range<usize>) -> Bytes {
        let source: &'static [u8] = *self;
        Bytes::from_static(&source[range])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerEvent {
    Data(Bytes),
    End,
}

/// Lazily slices a [`ByteSource`] into chunks of at most `chunk_size` bytes.
///
/// The sequence is finite and cannot be restarted. Chunks cover the source
/// contiguously, and `End` is produced exactly once after the last chunk.
#[derive(Debug)]
pub struct ChunkedProducer<S> {
    source: S,
    size: usize,
    cursor: usize,
    chunk_size: usize,
    paused: bool,
    readable: bool,
    ended: bool,
    yield_pending: bool,
}

impl<S: ByteSource> ChunkedProducer<S> {
    /// Panics if `chunk_size` is zero; [`crate::Config::validate`] rules that out
    /// for configured sizes.
    pub fn new(source: S, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        let size = source.len();
        Self {
            source,
            size,
            cursor: 0,
            chunk_size,
            paused: false,
            readable: true,
            ended: false,
            yield_pending: false,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Offset of the next unsent byte.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.size - self.cursor
    }

    /// Stop producing. No `End` is emitted for a destroyed producer.
    pub fn destroy(&mut self) {
        self.readable = false;
        self.ended = true;
    }

    /// Compute the next event without yielding. Returns `None` while paused
    /// and once the sequence is over.
    pub fn produce(&mut self) -> Option<ProducerEvent> {
        if self.ended || self.paused {
            return None;
        }

        if self.cursor >= self.size {
            self.readable = false;
            self.ended = true;
            return Some(ProducerEvent::End);
        }

        let end = self.size.min(self.cursor + self.chunk_size);
        let chunk = self.source.slice(self.cursor..end);
        self.cursor = end;
        Some(ProducerEvent::Data(chunk))
    }

    /// Like [`ChunkedProducer::produce`], but hands control back to the
    /// scheduler between chunks so one large source cannot hog the thread.
    pub async fn next_event(&mut self) -> Option<ProducerEvent> {
        if self.yield_pending {
            self.yield_pending = false;
            tokio::task::yield_now().await;
        }

        let event = self.produce();
        if matches!(event, Some(ProducerEvent::Data(_))) {
            self.yield_pending = true;
        }
        event
    }

    /// Write every chunk into `stream`, waiting out peer pauses, then end the
    /// stream's write half. Returns the number of bytes written.
    pub async fn pipe(mut self, stream: &Stream) -> Result<u64> {
        let mut written = 0u64;

        while let Some(event) = self.next_event().await {
            match event {
                ProducerEvent::Data(chunk) => {
                    let len = chunk.len() as u64;
                    let ready = match stream.write(chunk).await {
                        Ok(ready) => ready,
                        Err(e) => {
                            self.destroy();
                            return Err(e);
                        }
                    };
                    written += len;

                    if !ready {
                        tracing::trace!(stream_id = stream.id(), "producer paused by backpressure");
                        self.pause();
                        stream.drained().await;
                        self.resume();
                    }
                }
                ProducerEvent::End => stream.end().await?,
            }
        }

        Ok(written)
    }
}
