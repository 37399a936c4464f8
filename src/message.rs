use crate::{
    error::{MuxError, Result},
    frame::Frame,
    kind::MessageKind,
};
use bytes::Bytes;

/// Application-defined description attached to a StreamOpen.
pub type Metadata = serde_json::Value;

/// A decoded protocol message, one variant per live kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    StreamOpen { id: u32, metadata: Metadata },
    Data { id: u32, chunk: Bytes },
    Pause { id: u32 },
    Resume { id: u32 },
    End { id: u32 },
    Close { id: u32 },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::StreamOpen { .. } => MessageKind::StreamOpen,
            Message::Data { .. } => MessageKind::Data,
            Message::Pause { .. } => MessageKind::Pause,
            Message::Resume { .. } => MessageKind::Resume,
            Message::End { .. } => MessageKind::End,
            Message::Close { .. } => MessageKind::Close,
        }
    }

    pub fn stream_id(&self) -> u32 {
        match self {
            Message::StreamOpen { id, .. }
            | Message::Data { id, .. }
            | Message::Pause { id }
            | Message::Resume { id }
            | Message::End { id }
            | Message::Close { id } => *id,
        }
    }

    pub fn into_frame(self, version: u8) -> Result<Frame> {
        let frame = match self {
            Message::StreamOpen { id, metadata } => {
                let data = if metadata.is_null() {
                    Bytes::new()
                } else {
                    Bytes::from(serde_json::to_vec(&metadata)?)
                };
                Frame::new(version, MessageKind::StreamOpen, id, data)
            }
            Message::Data { id, chunk } => Frame::new_data(version, id, chunk),
            Message::Pause { id } => Frame::new_control(version, MessageKind::Pause, id),
            Message::Resume { id } => Frame::new_control(version, MessageKind::Resume, id),
            Message::End { id } => Frame::new_control(version, MessageKind::End, id),
            Message::Close { id } => Frame::new_control(version, MessageKind::Close, id),
        };
        Ok(frame)
    }
}

impl TryFrom<Frame> for Message {
    type Error = MuxError;

    fn try_from(frame: Frame) -> Result<Self> {
        let kind = frame.kind()?;

        if kind.is_control() && !frame.data.is_empty() {
            return Err(MuxError::ProtocolViolation(format!(
                "{kind:?} message for stream {} carries {} bytes of payload",
                frame.stream_id,
                frame.data.len()
            )));
        }

        let id = frame.stream_id;
        let message = match kind {
            MessageKind::Reserved => return Err(MuxError::UnrecognizedMessage(frame.kind)),
            MessageKind::StreamOpen => {
                let metadata = if frame.data.is_empty() {
                    Metadata::Null
                } else {
                    serde_json::from_slice(&frame.data)?
                };
                Message::StreamOpen { id, metadata }
            }
            MessageKind::Data => Message::Data {
                id,
                chunk: frame.data,
            },
            MessageKind::Pause => Message::Pause { id },
            MessageKind::Resume => Message::Resume { id },
            MessageKind::End => Message::End { id },
            MessageKind::Close => Message::Close { id },
        };
        Ok(message)
    }
}
