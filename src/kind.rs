use crate::error::{MuxError, Result};

/// The message kinds carried in the first tuple position of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Reserved,
    StreamOpen,
    Data,
    Pause,
    Resume,
    End,
    Close,
}

impl MessageKind {
    pub const RESERVED: u8 = 0;
    pub const STREAM_OPEN: u8 = 1;
    pub const DATA: u8 = 2;
    pub const PAUSE: u8 = 3;
    pub const RESUME: u8 = 4;
    pub const END: u8 = 5;
    pub const CLOSE: u8 = 6;

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            Self::RESERVED => Ok(MessageKind::Reserved),
            Self::STREAM_OPEN => Ok(MessageKind::StreamOpen),
            Self::DATA => Ok(MessageKind::Data),
            Self::PAUSE => Ok(MessageKind::Pause),
            Self::RESUME => Ok(MessageKind::Resume),
            Self::END => Ok(MessageKind::End),
            Self::CLOSE => Ok(MessageKind::Close),
            _ => Err(MuxError::UnrecognizedMessage(byte)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            MessageKind::Reserved => Self::RESERVED,
            MessageKind::StreamOpen => Self::STREAM_OPEN,
            MessageKind::Data => Self::DATA,
            MessageKind::Pause => Self::PAUSE,
            MessageKind::Resume => Self::RESUME,
            MessageKind::End => Self::END,
            MessageKind::Close => Self::CLOSE,
        }
    }

    /// Pause, Resume, End and Close carry no payload.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            MessageKind::Pause | MessageKind::Resume | MessageKind::End | MessageKind::Close
        )
    }

    pub fn can_carry_data(self) -> bool {
        matches!(self, MessageKind::StreamOpen | MessageKind::Data)
    }
}
