use crate::{
    codec::Codec,
    config::Config,
    error::{MuxError, Result},
    frame::Frame,
    kind::MessageKind,
    message::{Message, Metadata},
    producer::ChunkedProducer,
    stream::{Stream, StreamEvent, StreamState},
    stream_id::{Role, StreamIdGenerator},
    transport::MessageTransport,
};
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::{Sink, SinkExt, StreamExt, future, stream::BoxStream};
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{codec::Framed, sync::CancellationToken};

/// Notifications delivered to the owner of a [`Multiplexer`].
#[derive(Debug)]
pub enum MultiplexerEvent {
    /// The connection is up. Always the first event.
    Open,
    /// A non-fatal protocol error, or the transport failure that ends the
    /// connection.
    Error(MuxError),
    /// The connection is gone and every stream has been closed. Always the
    /// last event.
    Close(Option<CloseReason>),
    /// The peer opened a stream.
    Stream(Stream, Metadata),
}

/// Code and reason given to [`Multiplexer::close_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// Data handed to [`Multiplexer::send`].
pub enum Outgoing {
    /// A contiguous buffer, sent in `Config::chunk_size` pieces.
    Buffer(Bytes),
    /// A single message, sent as one Data frame.
    Message(Bytes),
    /// A source that already produces chunks; piped as-is.
    Source(BoxStream<'static, Bytes>),
}

impl Outgoing {
    pub fn source<S>(source: S) -> Self
    where
        S: futures::Stream<Item = Bytes> + Send + 'static,
    {
        Outgoing::Source(source.boxed())
    }
}

impl From<Bytes> for Outgoing {
    fn from(bytes: Bytes) -> Self {
        Outgoing::Buffer(bytes)
    }
}

impl From<Vec<u8>> for Outgoing {
    fn from(bytes: Vec<u8>) -> Self {
        Outgoing::Buffer(Bytes::from(bytes))
    }
}

impl From<String> for Outgoing {
    fn from(text: String) -> Self {
        Outgoing::Message(Bytes::from(text))
    }
}

impl From<&'static str> for Outgoing {
    fn from(text: &'static str) -> Self {
        Outgoing::Message(Bytes::from_static(text.as_bytes()))
    }
}

/// Multiplexes many [`Stream`]s over one ordered, reliable connection.
///
/// Two background tasks own the transport: one decodes and dispatches inbound
/// frames, the other drains the outbound queue. Handles are cheap to clone.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

/// State shared by the multiplexer handles, its tasks and every stream.
#[derive(Debug)]
pub(crate) struct Inner {
    /// Registered streams by identifier
    streams: DashMap<u32, Arc<StreamState>>,
    config: Arc<Config>,
    ids: StreamIdGenerator,
    /// Sender for outgoing frames (to send_loop)
    frame_tx: flume::Sender<Frame>,
    events_tx: flume::Sender<MultiplexerEvent>,
    events_rx: flume::Receiver<MultiplexerEvent>,
    shutdown: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    /// Set once a handle has taken the final `Close` event.
    terminated: AtomicBool,
}

impl Multiplexer {
    /// Create the client side over a byte pipe.
    pub fn client<T>(io: T, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_io(io, config, Role::Client)
    }

    /// Create the server side over a byte pipe.
    pub fn server<T>(io: T, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_io(io, config, Role::Server)
    }

    /// Run over a byte pipe, framing messages with [`Codec`].
    pub fn from_io<T>(io: T, config: Config, role: Role) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let framed = Framed::new(io, Codec::new(config.clone()));
        let (sink, stream) = framed.split();
        Ok(Self::start(sink, stream, config, role))
    }

    /// Run over a transport that already delivers discrete messages.
    pub fn with_transport<T>(transport: T, config: Config, role: Role) -> Result<Self>
    where
        T: MessageTransport,
    {
        config.validate()?;
        let mut encoder = Codec::new(config.clone());
        let mut decoder = encoder.clone();

        let (sink, stream) = transport.split::<Bytes>();
        let sink = sink
            .sink_map_err(MuxError::from)
            .with(move |frame: Frame| future::ready(encoder.encode_message(frame)));
        let stream = stream.map(move |message| {
            message
                .map_err(MuxError::from)
                .and_then(|bytes| decoder.decode_message(bytes))
        });

        Ok(Self::start(sink, stream, config, role))
    }

    fn start<Si, St>(sink: Si, stream: St, config: Config, role: Role) -> Self
    where
        Si: Sink<Frame, Error = MuxError> + Send + 'static,
        St: futures::Stream<Item = Result<Frame>> + Send + 'static,
    {
        let (frame_tx, frame_rx) = flume::bounded(config.send_queue_capacity);
        let (events_tx, events_rx) = flume::unbounded();

        let inner = Arc::new(Inner {
            streams: DashMap::new(),
            config: Arc::new(config),
            ids: StreamIdGenerator::new(role),
            frame_tx,
            events_tx,
            events_rx,
            shutdown: CancellationToken::new(),
            close_reason: Mutex::new(None),
            terminated: AtomicBool::new(false),
        });
        inner.emit(MultiplexerEvent::Open);

        tokio::spawn(recv_loop(stream, Arc::clone(&inner)));
        tokio::spawn(send_loop(sink, frame_rx, Arc::clone(&inner)));

        Self { inner }
    }

    /// Open a new outgoing stream. The identifier is usable immediately; the
    /// StreamOpen frame is queued ahead of anything written to the stream.
    pub async fn create_stream(&self, metadata: impl Into<Metadata>) -> Result<Stream> {
        if self.is_closed() {
            return Err(MuxError::ConnectionClosed);
        }

        let id = self.inner.ids.next()?;
        let frame = Message::StreamOpen {
            id,
            metadata: metadata.into(),
        }
        .into_frame(self.inner.config.version)?;
        frame.validate(&self.inner.config)?;

        let state = Arc::new(StreamState::new(id));
        self.inner.streams.insert(id, Arc::clone(&state));

        if let Err(e) = self.inner.send_frame(frame).await {
            self.inner.streams.remove(&id);
            return Err(e);
        }

        tracing::debug!(stream_id = id, "opened stream");
        Ok(Stream::new(state, Arc::clone(&self.inner)))
    }

    /// Open a stream and feed `data` into it on a background task.
    ///
    /// Buffers are chunked, single messages go out as one frame and sources
    /// are piped. The write half is ended once the data is exhausted; a
    /// failure is reported as [`StreamEvent::Error`] on the returned stream.
    pub async fn send(
        &self,
        data: impl Into<Outgoing>,
        metadata: impl Into<Metadata>,
    ) -> Result<Stream> {
        let stream = self.create_stream(metadata).await?;
        let outgoing = data.into();
        let chunk_size = self.inner.config.chunk_size;
        let feeder = stream.clone();

        tokio::spawn(async move {
            let result = match outgoing {
                Outgoing::Buffer(bytes) => {
                    ChunkedProducer::new(bytes, chunk_size).pipe(&feeder).await
                }
                Outgoing::Message(bytes) => write_once(&feeder, bytes).await,
                Outgoing::Source(source) => feeder.pipe_from(source).await,
            };

            match result {
                Ok(written) => {
                    tracing::debug!(stream_id = feeder.id(), written, "send complete");
                }
                // Destroying the stream is how a send is cancelled
                Err(e) if feeder.is_closed() => {
                    tracing::trace!(stream_id = feeder.id(), "send stopped by close: {}", e);
                }
                Err(e) => {
                    tracing::warn!(stream_id = feeder.id(), "send failed: {}", e);
                    feeder.state().emit(StreamEvent::Error(e));
                }
            }
        });

        Ok(stream)
    }

    /// Wait for the next connection event. Returns `None` after `Close` has
    /// been taken.
    pub async fn next_event(&self) -> Option<MultiplexerEvent> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return None;
        }
        let event = self.inner.events_rx.recv_async().await.ok()?;
        Some(self.observe(event))
    }

    pub fn try_next_event(&self) -> Option<MultiplexerEvent> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return None;
        }
        let event = self.inner.events_rx.try_recv().ok()?;
        Some(self.observe(event))
    }

    fn observe(&self, event: MultiplexerEvent) -> MultiplexerEvent {
        if matches!(event, MultiplexerEvent::Close(_)) {
            self.inner.terminated.store(true, Ordering::Release);
        }
        event
    }

    /// Wait for the peer to open a stream, discarding other events.
    pub async fn accept_stream(&self) -> Result<(Stream, Metadata)> {
        loop {
            match self.next_event().await {
                Some(MultiplexerEvent::Stream(stream, metadata)) => return Ok((stream, metadata)),
                Some(MultiplexerEvent::Error(e)) => {
                    tracing::debug!("accept_stream skipping error: {}", e);
                }
                Some(MultiplexerEvent::Open) => {}
                Some(MultiplexerEvent::Close(_)) | None => return Err(MuxError::ConnectionClosed),
            }
        }
    }

    /// Look up a registered stream.
    pub fn stream(&self, id: u32) -> Option<Stream> {
        let state = self.inner.streams.get(&id).map(|entry| Arc::clone(entry.value()))?;
        Some(Stream::new(state, Arc::clone(&self.inner)))
    }

    pub fn stream_count(&self) -> usize {
        self.inner.streams.len()
    }

    pub fn role(&self) -> Role {
        self.inner.ids.role()
    }

    pub fn config(&self) -> &Config {
        self.inner.config()
    }

    /// Close the underlying transport. Streams are closed when the receive
    /// loop observes the shutdown.
    #[inline]
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Close with a code and reason, reported in the final `Close` event.
    pub fn close_with(&self, code: u16, reason: impl Into<String>) {
        let reason = CloseReason {
            code,
            reason: reason.into(),
        };
        tracing::info!(code, reason = %reason.reason, "closing connection");
        *self
            .inner
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.close();
    }

    #[inline]
    pub fn destroy(&self) {
        self.close();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("role", &self.role())
            .field("streams", &self.stream_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Inner {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(MuxError::ConnectionClosed);
        }
        self.frame_tx
            .send_async(frame)
            .await
            .map_err(|_| MuxError::ConnectionClosed)
    }

    pub(crate) async fn send_message(&self, message: Message) -> Result<()> {
        let frame = message.into_frame(self.config.version)?;
        self.send_frame(frame).await
    }

    pub(crate) fn is_send_queue_full(&self) -> bool {
        self.frame_tx.is_full()
    }

    /// Remove `state` from the registry unless the id has since been reused.
    pub(crate) fn unregister(&self, state: &Arc<StreamState>) {
        let id = state.id();
        self.streams
            .remove_if(&id, |_, registered| Arc::ptr_eq(registered, state));
    }

    fn emit(&self, event: MultiplexerEvent) {
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.events_tx.send(event);
    }

    fn report(&self, error: MuxError) {
        if error.is_fatal() {
            tracing::error!("connection error: {}", error);
        } else {
            tracing::warn!("protocol error: {}", error);
        }
        self.emit(MultiplexerEvent::Error(error));
    }

    fn lookup(&self, kind: MessageKind, id: u32) -> Option<Arc<StreamState>> {
        let state = self.streams.get(&id).map(|entry| Arc::clone(entry.value()));
        if state.is_none() {
            self.report(MuxError::UnknownStream { kind, id });
        }
        state
    }

    /// Close every registered stream and emit the final `Close` event.
    fn teardown(&self) {
        self.shutdown.cancel();

        let states: Vec<Arc<StreamState>> = self
            .streams
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for state in &states {
            state.close();
        }
        self.streams.clear();

        let reason = self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!(streams = states.len(), "connection closed");
        self.emit(MultiplexerEvent::Close(reason));
    }
}

async fn write_once(stream: &Stream, bytes: Bytes) -> Result<u64> {
    let written = bytes.len() as u64;
    stream.write(bytes).await?;
    stream.end().await?;
    Ok(written)
}

/// Background task that reads frames from the transport and dispatches them
async fn recv_loop<St>(stream: St, inner: Arc<Inner>)
where
    St: futures::Stream<Item = Result<Frame>>,
{
    futures::pin_mut!(stream);
    let shutdown = inner.shutdown.clone();

    loop {
        tokio::select! {
            next = stream.next() => {
                match next {
                    Some(Ok(frame)) => handle_frame(frame, &inner),
                    Some(Err(e)) => {
                        let fatal = e.is_fatal();
                        inner.report(e);
                        if fatal {
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Transport closed");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("recv_loop shutting down");
                break;
            }
        }

        // One message per scheduler tick
        tokio::task::yield_now().await;
    }

    inner.teardown();
}

/// Background task that writes frames to the transport
async fn send_loop<Si>(sink: Si, frame_rx: flume::Receiver<Frame>, inner: Arc<Inner>)
where
    Si: Sink<Frame, Error = MuxError>,
{
    futures::pin_mut!(sink);
    let shutdown = inner.shutdown.clone();

    loop {
        tokio::select! {
            result = frame_rx.recv_async() => {
                match result {
                    Ok(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            let fatal = e.is_fatal();
                            inner.report(e);
                            if fatal {
                                break;
                            }
                        }
                    }
                    Err(_) => {
                        tracing::info!("Frame sender closed");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                // Flush what was queued before the close
                while let Ok(frame) = frame_rx.try_recv() {
                    if sink.feed(frame).await.is_err() {
                        break;
                    }
                }
                tracing::info!("send_loop shutting down");
                break;
            }
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("error closing transport: {}", e);
    }
    inner.shutdown.cancel();
}

/// Handle an incoming frame based on its message kind
fn handle_frame(frame: Frame, inner: &Arc<Inner>) {
    let message = match Message::try_from(frame) {
        Ok(message) => message,
        Err(e) => {
            inner.report(e);
            return;
        }
    };
    tracing::trace!(kind = ?message.kind(), stream_id = message.stream_id(), "dispatching");

    match message {
        Message::StreamOpen { id, metadata } => handle_stream_open(id, metadata, inner),
        Message::Data { id, chunk } => {
            if let Some(state) = inner.lookup(MessageKind::Data, id) {
                state.on_data(chunk);
            }
        }
        Message::Pause { id } => {
            if let Some(state) = inner.lookup(MessageKind::Pause, id) {
                state.on_pause();
            }
        }
        Message::Resume { id } => {
            if let Some(state) = inner.lookup(MessageKind::Resume, id) {
                state.on_resume();
            }
        }
        Message::End { id } => {
            if let Some(state) = inner.lookup(MessageKind::End, id) {
                state.on_end();
            }
        }
        Message::Close { id } => {
            if let Some(state) = inner.lookup(MessageKind::Close, id) {
                inner.unregister(&state);
                state.on_close();
            }
        }
    }
}

/// Handle StreamOpen (new stream from peer)
fn handle_stream_open(id: u32, metadata: Metadata, inner: &Arc<Inner>) {
    if let Err(e) = inner.ids.validate_peer_stream_id(id) {
        inner.report(e);
        return;
    }

    let state = match inner.streams.entry(id) {
        Entry::Occupied(_) => {
            inner.report(MuxError::StreamAlreadyExists(id));
            return;
        }
        Entry::Vacant(vacant) => {
            let state = Arc::new(StreamState::new(id));
            vacant.insert(Arc::clone(&state));
            state
        }
    };

    tracing::debug!(stream_id = id, "accepted stream");
    let stream = Stream::new(state, Arc::clone(inner));
    inner.emit(MultiplexerEvent::Stream(stream, metadata));
}
