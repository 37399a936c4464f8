use crate::{
    config::Config,
    error::{MuxError, Result},
    kind::MessageKind,
};
use bytes::Bytes;

/// version (1) + kind (1) + length (2) + stream id (4).
pub const HEADER_SIZE: usize = 8;

/// One wire unit, before its kind has been interpreted.
///
/// The kind is kept as a raw byte so a frame of an unknown kind still decodes;
/// [`crate::Message::try_from`] is where unknown kinds are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub kind: u8,
    pub stream_id: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(version: u8, kind: MessageKind, stream_id: u32, data: Bytes) -> Self {
        Self::raw(version, kind.to_byte(), stream_id, data)
    }

    pub fn raw(version: u8, kind: u8, stream_id: u32, data: Bytes) -> Self {
        Self {
            version,
            kind,
            stream_id,
            data,
        }
    }

    pub fn new_data(version: u8, stream_id: u32, data: Bytes) -> Self {
        Self::new(version, MessageKind::Data, stream_id, data)
    }

    pub fn new_control(version: u8, kind: MessageKind, stream_id: u32) -> Self {
        Self::new(version, kind, stream_id, Bytes::new())
    }

    pub fn kind(&self) -> Result<MessageKind> {
        MessageKind::from_byte(self.kind)
    }

    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Structural checks only: anything that would make the bytes on the wire
    /// ambiguous. Semantic checks happen when the frame becomes a message.
    pub fn validate(&self, config: &Config) -> Result<()> {
        if self.version == 0 {
            return Err(MuxError::InvalidProtocol(self.version));
        }

        if self.total_size() > config.max_frame_size {
            return Err(MuxError::FrameTooLarge {
                size: self.total_size(),
                max: config.max_frame_size,
            });
        }

        Ok(())
    }
}
