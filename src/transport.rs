use bytes::Bytes;
use futures::{Sink, Stream};
use std::io;

/// An ordered, reliable, message-framed duplex channel.
///
/// Every item sent or received is one whole protocol frame. Anything that is
/// both a `Sink<Bytes>` and a `Stream` of `io::Result<Bytes>` qualifies, e.g.
/// a WebSocket adapter or a `Framed` pipe with a length-delimited codec.
pub trait MessageTransport:
    Sink<Bytes, Error = io::Error> + Stream<Item = io::Result<Bytes>> + Send + 'static
{
}

impl<T> MessageTransport for T where
    T: Sink<Bytes, Error = io::Error> + Stream<Item = io::Result<Bytes>> + Send + 'static
{
}
