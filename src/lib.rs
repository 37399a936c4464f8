//! Multiplex many pausable, half-closable binary streams over a single
//! ordered, reliable connection.
//!
//! ```no_run
//! use binmux::{Config, Multiplexer, StreamEvent};
//! use serde_json::json;
//!
//! # async fn run(io: tokio::io::DuplexStream) -> binmux::Result<()> {
//! let mux = Multiplexer::client(io, Config::default())?;
//! let stream = mux.create_stream(json!({"type": "file"})).await?;
//! stream.write(&b"hello"[..]).await?;
//! stream.end().await?;
//!
//! while let Some(event) = stream.next_event().await {
//!     if let StreamEvent::Data(chunk) = event {
//!         println!("got {} bytes", chunk.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod kind;
pub mod message;
pub mod multiplexer;
pub mod producer;
pub mod stream;
pub mod stream_id;
pub mod transport;

pub use codec::Codec;
pub use config::{Config, ConfigBuilder};
pub use error::{MuxError, Result};
pub use frame::{Frame, HEADER_SIZE};
pub use kind::MessageKind;
pub use message::{Message, Metadata};
pub use multiplexer::{CloseReason, Multiplexer, MultiplexerEvent, Outgoing};
pub use producer::{ByteSource, ChunkedProducer, ProducerEvent};
pub use stream::{Stream, StreamEvent};
pub use stream_id::{Role, StreamIdGenerator};
pub use transport::MessageTransport;
