use crate::{
    error::{MuxError, Result},
    frame::HEADER_SIZE,
    message::Message,
    multiplexer::Inner,
};
use bytes::Bytes;
use futures::{Stream as FuturesStream, StreamExt};
use std::fmt;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::{Mutex as AsyncMutex, Notify};

/// Notifications delivered to the holder of a [`Stream`].
#[derive(Debug)]
pub enum StreamEvent {
    /// A chunk of data from the peer.
    Data(Bytes),
    /// The stream was paused, locally or by the peer.
    Pause,
    /// The stream was resumed, locally or by the peer.
    Resume,
    /// Writers gated by a peer pause may continue.
    Drain,
    /// The peer finished writing; no more `Data` follows.
    End,
    /// Both halves are closed. Always the last event.
    Close,
    /// Feeding the stream in the background failed.
    Error(MuxError),
}

/// Per-stream state shared between the registry and every handle.
#[derive(Debug)]
pub(crate) struct StreamState {
    id: u32,
    readable: AtomicBool,
    writable: AtomicBool,
    paused: AtomicBool,
    peer_paused: AtomicBool,
    closed: AtomicBool,
    /// Set once a handle has taken the `Close` event.
    terminated: AtomicBool,
    events_tx: flume::Sender<StreamEvent>,
    events_rx: flume::Receiver<StreamEvent>,
    /// Orders every emission against `close`, so nothing follows `Close`.
    emit_lock: Mutex<()>,
    /// Held while queueing outbound frames, so no frame follows our Close.
    send_lock: AsyncMutex<()>,
    drain: Notify,
}

impl StreamState {
    pub(crate) fn new(id: u32) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            id,
            readable: AtomicBool::new(true),
            writable: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            peer_paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            events_tx,
            events_rx,
            emit_lock: Mutex::new(()),
            send_lock: AsyncMutex::new(()),
            drain: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Queue an event unless the stream has closed. Returns whether it was
    /// queued.
    pub(crate) fn emit(&self, event: StreamEvent) -> bool {
        let _guard = self.emit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return false;
        }
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.events_tx.send(event);
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close both halves. Returns false if the stream was already closed.
    pub(crate) fn close(&self) -> bool {
        {
            let _guard = self.emit_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            self.readable.store(false, Ordering::Release);
            self.writable.store(false, Ordering::Release);
            let _ = self.events_tx.send(StreamEvent::Close);
        }
        self.drain.notify_waiters();
        true
    }

    pub(crate) fn on_data(&self, chunk: Bytes) {
        if !self.readable.load(Ordering::Acquire) {
            tracing::trace!(
                stream_id = self.id,
                len = chunk.len(),
                "dropping data for unreadable stream"
            );
            return;
        }
        self.emit(StreamEvent::Data(chunk));
    }

    pub(crate) fn on_pause(&self) {
        if self.is_closed() {
            return;
        }
        self.peer_paused.store(true, Ordering::Release);
        self.emit(StreamEvent::Pause);
    }

    pub(crate) fn on_resume(&self) {
        if self.is_closed() {
            return;
        }
        self.peer_paused.store(false, Ordering::Release);
        self.emit(StreamEvent::Resume);
        self.emit(StreamEvent::Drain);
        self.drain.notify_waiters();
    }

    pub(crate) fn on_end(&self) {
        if self.readable.swap(false, Ordering::AcqRel) {
            self.emit(StreamEvent::End);
        }
    }

    pub(crate) fn on_close(&self) {
        if self.close() {
            tracing::debug!(stream_id = self.id, "stream closed by peer");
        }
    }
}

/// One logical, bidirectional byte channel multiplexed over the connection.
///
/// Handles are cheap to clone; all clones observe the same state and share a
/// single event queue. The read and write halves close independently.
#[derive(Clone)]
pub struct Stream {
    state: Arc<StreamState>,
    inner: Arc<Inner>,
}

impl Stream {
    pub(crate) fn new(state: Arc<StreamState>, inner: Arc<Inner>) -> Self {
        Self { state, inner }
    }

    pub(crate) fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    pub fn id(&self) -> u32 {
        self.state.id
    }

    pub fn is_readable(&self) -> bool {
        self.state.readable.load(Ordering::Acquire)
    }

    pub fn is_writable(&self) -> bool {
        self.state.writable.load(Ordering::Acquire)
    }

    /// Whether this side asked the peer to stop sending.
    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    /// Whether the peer asked this side to stop sending.
    pub fn is_peer_paused(&self) -> bool {
        self.state.peer_paused.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Send one chunk to the peer.
    ///
    /// Returns `Ok(false)` when the caller should hold off: the peer has paused
    /// this stream or the connection's outbound queue is full. The chunk has
    /// been queued either way.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<bool> {
        let chunk = data.into();
        let config = self.inner.config();
        if chunk.len() > config.max_payload_size() {
            return Err(MuxError::FrameTooLarge {
                size: HEADER_SIZE + chunk.len(),
                max: config.max_frame_size,
            });
        }

        let _guard = self.state.send_lock.lock().await;
        if !self.is_writable() {
            return Err(MuxError::NotWritable(self.id()));
        }
        self.inner
            .send_message(Message::Data {
                id: self.id(),
                chunk,
            })
            .await?;

        Ok(!self.is_peer_paused() && !self.inner.is_send_queue_full())
    }

    /// Finish the write half. The read half stays open until the peer ends or
    /// closes. Calling `end` again is a no-op.
    pub async fn end(&self) -> Result<()> {
        let _guard = self.state.send_lock.lock().await;
        if !self.state.writable.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(stream_id = self.id(), "ending write half");
        self.inner.send_message(Message::End { id: self.id() }).await
    }

    /// Close both halves, tell the peer, and drop the stream from the registry.
    /// Only the first call has any effect.
    pub async fn destroy(&self) -> Result<()> {
        let _guard = self.state.send_lock.lock().await;
        if !self.state.close() {
            return Ok(());
        }
        tracing::debug!(stream_id = self.id(), "destroying stream");
        self.inner.unregister(&self.state);
        self.inner.send_message(Message::Close { id: self.id() }).await
    }

    /// Close once queued writes have gone out. The outbound queue is FIFO, so
    /// the Close frame already follows every earlier write.
    pub async fn destroy_soon(&self) -> Result<()> {
        self.destroy().await
    }

    /// Ask the peer to stop sending data on this stream.
    pub async fn pause(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.state.paused.store(true, Ordering::Release);
        self.state.emit(StreamEvent::Pause);
        self.inner.send_message(Message::Pause { id: self.id() }).await
    }

    /// Let the peer send again.
    pub async fn resume(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.state.paused.store(false, Ordering::Release);
        self.state.emit(StreamEvent::Resume);
        self.state.emit(StreamEvent::Drain);
        self.inner.send_message(Message::Resume { id: self.id() }).await
    }

    /// Wait for the next event. Returns `None` after `Close` has been taken.
    pub async fn next_event(&self) -> Option<StreamEvent> {
        if self.state.terminated.load(Ordering::Acquire) {
            return None;
        }
        let event = self.state.events_rx.recv_async().await.ok()?;
        Some(self.observe(event))
    }

    pub fn try_next_event(&self) -> Option<StreamEvent> {
        if self.state.terminated.load(Ordering::Acquire) {
            return None;
        }
        let event = self.state.events_rx.try_recv().ok()?;
        Some(self.observe(event))
    }

    fn observe(&self, event: StreamEvent) -> StreamEvent {
        if matches!(event, StreamEvent::Close) {
            self.state.terminated.store(true, Ordering::Release);
        }
        event
    }

    /// Resolve once the peer is no longer pausing this stream, or the stream
    /// has closed.
    pub async fn drained(&self) {
        loop {
            let notified = self.state.drain.notified();
            if !self.is_peer_paused() || self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Write everything `source` yields, honoring peer pauses, then end the
    /// write half. Items larger than a frame are split. Returns the number of
    /// bytes written.
    pub async fn pipe_from<S>(&self, source: S) -> Result<u64>
    where
        S: FuturesStream<Item = Bytes>,
    {
        futures::pin_mut!(source);
        let max_payload = self.inner.config().max_payload_size();
        let mut written = 0u64;

        while let Some(mut chunk) = source.next().await {
            while !chunk.is_empty() {
                let piece = chunk.split_to(chunk.len().min(max_payload));
                written += piece.len() as u64;
                if !self.write(piece).await? {
                    self.drained().await;
                }
            }
        }

        self.end().await?;
        Ok(written)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .field("paused", &self.is_paused())
            .field("peer_paused", &self.is_peer_paused())
            .finish()
    }
}
