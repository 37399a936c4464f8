use crate::kind::MessageKind;
use std::io;
use thiserror::Error;

/// Convenient type alias for `Result<T, MuxError>`.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Error types for the binmux library.
///
/// Most variants describe a single bad message or a misuse of one stream and
/// leave the connection usable. [`MuxError::is_fatal`] tells the two apart.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid protocol version: {0}")]
    InvalidProtocol(u8),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unknown stream {id} referenced by {kind:?} message")]
    UnknownStream { kind: MessageKind, id: u32 },

    #[error("Stream already exists: {0}")]
    StreamAlreadyExists(u32),

    #[error("Invalid stream ID: {0}")]
    InvalidStreamId(u32),

    #[error("Stream {0} is not writable")]
    NotWritable(u32),

    #[error("Unrecognized message type: {0}")]
    UnrecognizedMessage(u8),

    #[error("Invalid stream metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid frame format")]
    InvalidFrame,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Insufficient data for frame parsing")]
    InsufficientData,
}

impl MuxError {
    /// Whether the error ends the whole connection rather than one message.
    pub fn is_fatal(&self) -> bool {
        match self {
            MuxError::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            MuxError::ConnectionClosed => true,
            MuxError::InvalidProtocol(_)
            | MuxError::FrameTooLarge { .. }
            | MuxError::UnknownStream { .. }
            | MuxError::StreamAlreadyExists(_)
            | MuxError::InvalidStreamId(_)
            | MuxError::NotWritable(_)
            | MuxError::UnrecognizedMessage(_)
            | MuxError::Metadata(_)
            | MuxError::Config(_)
            | MuxError::InvalidFrame
            | MuxError::ProtocolViolation(_)
            | MuxError::InsufficientData => false,
        }
    }
}
