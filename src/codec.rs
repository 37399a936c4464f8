use crate::{
    config::Config,
    error::{MuxError, Result},
    frame::{Frame, HEADER_SIZE},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frame codec shared by both transport flavours.
///
/// Over a byte pipe it is driven by `tokio_util::codec::Framed`; over a
/// message-framed transport every transport message holds exactly one frame
/// and [`Codec::encode_message`] / [`Codec::decode_message`] are used instead.
#[derive(Debug, Clone)]
pub struct Codec {
    config: Config,
    max_frame_size: usize,
}

impl Codec {
    pub fn new(config: Config) -> Self {
        let max_frame_size = config.max_frame_size;
        Self {
            config,
            max_frame_size,
        }
    }

    fn decode_header(src: &mut BytesMut) -> Result<(u8, u8, u32, u16)> {
        if src.len() < HEADER_SIZE {
            return Err(MuxError::InsufficientData);
        }

        let version = src.get_u8();
        let kind = src.get_u8();
        let length = src.get_u16_le();
        let stream_id = src.get_u32_le();

        Ok((version, kind, stream_id, length))
    }

    fn encode_header(dst: &mut BytesMut, version: u8, kind: u8, stream_id: u32, length: u16) {
        dst.put_u8(version);
        dst.put_u8(kind);
        dst.put_u16_le(length);
        dst.put_u32_le(stream_id);
    }

    /// Encode a frame as one standalone transport message.
    pub fn encode_message(&mut self, frame: Frame) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(frame.total_size());
        self.encode(frame, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode one transport message that must hold exactly one frame.
    pub fn decode_message(&mut self, message: Bytes) -> Result<Frame> {
        let mut src = BytesMut::from(&message[..]);
        match self.decode(&mut src)? {
            Some(_) if !src.is_empty() => Err(MuxError::InvalidFrame),
            Some(frame) => Ok(frame),
            None => Err(MuxError::InsufficientData),
        }
    }
}

impl Decoder for Codec {
    type Item = Frame;
    type Error = MuxError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        // Check if we have enough bytes for the header
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming the bytes
        let length = u16::from_le_bytes([src[2], src[3]]) as usize;

        let total_frame_size = HEADER_SIZE + length;
        if total_frame_size > self.max_frame_size {
            return Err(MuxError::FrameTooLarge {
                size: total_frame_size,
                max: self.max_frame_size,
            });
        }

        if src.len() < total_frame_size {
            src.reserve(total_frame_size - src.len());
            return Ok(None);
        }

        let (version, kind, stream_id, length) = Self::decode_header(src)?;
        let data = src.split_to(length as usize).freeze();

        let frame = Frame::raw(version, kind, stream_id, data);
        frame.validate(&self.config)?;

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for Codec {
    type Error = MuxError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        frame.validate(&self.config)?;

        let length = u16::try_from(frame.data.len()).map_err(|_| MuxError::FrameTooLarge {
            size: frame.total_size(),
            max: self.max_frame_size,
        })?;

        dst.reserve(frame.total_size());
        Self::encode_header(dst, frame.version, frame.kind, frame.stream_id, length);
        dst.put_slice(&frame.data);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::MessageKind;

    fn test_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_codec_round_trip_data() {
        let mut codec = Codec::new(test_config());
        let frame = Frame::new_data(1, 123, Bytes::from("hello world"));

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 11);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_header_layout() {
        let mut codec = Codec::new(test_config());
        let frame = Frame::new_data(1, 0x0102_0304, Bytes::from("abc"));

        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        assert_eq!(buf[0], 1); // Version
        assert_eq!(buf[1], MessageKind::DATA);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 3);
        assert_eq!(
            u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            0x0102_0304
        );
        assert_eq!(&buf[8..], b"abc");
    }

    #[test]
    fn test_decode_partial_header() {
        let mut codec = Codec::new(test_config());
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new_control(1, MessageKind::End, 3), &mut buf)
            .unwrap();

        let mut partial = BytesMut::from(&buf[..4]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_data() {
        let mut codec = Codec::new(test_config());
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new_data(1, 3, Bytes::from("hello world")), &mut buf)
            .unwrap();

        let mut partial = BytesMut::from(&buf[..HEADER_SIZE + 5]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = Codec::new(test_config());
        let frame1 = Frame::new_data(1, 0, Bytes::from("first"));
        let frame2 = Frame::new_control(1, MessageKind::Close, 0);

        let mut buf = BytesMut::new();
        codec.encode(frame1.clone(), &mut buf).unwrap();
        codec.encode(frame2.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), frame1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), frame2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_unknown_kind_still_decodes() {
        let mut codec = Codec::new(test_config());
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u8(99); // Unknown kind
        buf.put_u16_le(0);
        buf.put_u32_le(5);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.kind, 99);
        assert!(frame.kind().is_err());
    }

    #[test]
    fn test_oversized_frames() {
        let config = Config {
            max_frame_size: 100,
            chunk_size: 50,
            ..Default::default()
        };
        let mut codec = Codec::new(config);

        let frame = Frame::new_data(1, 1, Bytes::from(vec![0u8; 200]));
        let mut buf = BytesMut::new();
        assert!(codec.encode(frame, &mut buf).is_err());

        // Header announcing more than the limit is rejected before buffering
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u8(MessageKind::DATA);
        buf.put_u16_le(500);
        buf.put_u32_le(1);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(MuxError::FrameTooLarge { size: 508, max: 100 })
        ));
    }

    #[test]
    fn test_decode_invalid_protocol_version() {
        let mut codec = Codec::new(test_config());

        let mut buf = BytesMut::new();
        buf.put_u8(0); // Invalid version
        buf.put_u8(MessageKind::DATA);
        buf.put_u16_le(0);
        buf.put_u32_le(123);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(MuxError::InvalidProtocol(0))
        ));
    }

    #[test]
    fn test_message_mode() {
        let mut codec = Codec::new(test_config());
        let frame = Frame::new_data(1, 7, Bytes::from("payload"));

        let message = codec.encode_message(frame.clone()).unwrap();
        assert_eq!(codec.decode_message(message.clone()).unwrap(), frame);

        // Truncated message
        let short = message.slice(..HEADER_SIZE + 2);
        assert!(matches!(
            codec.decode_message(short),
            Err(MuxError::InsufficientData)
        ));

        // Trailing bytes beyond the declared length
        let mut long = BytesMut::from(&message[..]);
        long.put_u8(0);
        assert!(matches!(
            codec.decode_message(long.freeze()),
            Err(MuxError::InvalidFrame)
        ));
    }
}
