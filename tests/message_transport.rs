//! Multiplexers running over a transport that already delivers whole
//! messages, here a length-delimited pipe standing in for a WebSocket.

use binmux::{
    Config, Message, MessageKind, Multiplexer, MultiplexerEvent, MuxError, Role, StreamEvent,
};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, TryStreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Helper macro to add timeout to tests
macro_rules! test_with_timeout {
    ($test_name:ident, $timeout_secs:expr, $test_body:block) => {
        #[tokio::test]
        async fn $test_name() {
            let result = tokio::time::timeout(
                Duration::from_secs($timeout_secs),
                async move $test_body
            ).await;

            match result {
                Ok(Ok(())) => {},
                Ok(Err(e)) => panic!("Test failed: {:?}", e),
                Err(_) => panic!("Test timed out after {} seconds", $timeout_secs),
            }
        }
    };
}

fn message_pipe(io: DuplexStream) -> Framed<DuplexStream, LengthDelimitedCodec> {
    Framed::new(io, LengthDelimitedCodec::new())
}

fn mux_over_messages(io: DuplexStream, role: Role) -> binmux::Result<Multiplexer> {
    let transport = message_pipe(io).map_ok(BytesMut::freeze);
    Multiplexer::with_transport(transport, Config::default(), role)
}

test_with_timeout!(test_exchange_over_message_transport, 10, {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let client = mux_over_messages(left, Role::Client)?;
    let server = mux_over_messages(right, Role::Server)?;

    let stream = client.create_stream(json!({"type": "file"})).await?;
    stream.write(Bytes::from_static(b"hello")).await?;
    stream.end().await?;

    let (accepted, metadata) = server.accept_stream().await?;
    assert_eq!(metadata, json!({"type": "file"}));
    match accepted.next_event().await {
        Some(StreamEvent::Data(chunk)) => assert_eq!(&chunk[..], b"hello"),
        other => panic!("expected data, got {other:?}"),
    }
    assert!(matches!(accepted.next_event().await, Some(StreamEvent::End)));

    accepted.write("reply").await?;
    accepted.destroy().await?;
    match stream.next_event().await {
        Some(StreamEvent::Data(chunk)) => assert_eq!(&chunk[..], b"reply"),
        other => panic!("expected data, got {other:?}"),
    }
    assert!(matches!(stream.next_event().await, Some(StreamEvent::Close)));

    Ok::<(), Box<dyn std::error::Error>>(())
});

test_with_timeout!(test_each_frame_is_one_message, 10, {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let client = mux_over_messages(left, Role::Client)?;
    let mut raw = message_pipe(right);

    let stream = client.create_stream(json!(null)).await?;
    stream.write(Bytes::from_static(b"abc")).await?;

    let open = raw.try_next().await?.ok_or("transport closed")?;
    assert_eq!(open.len(), binmux::HEADER_SIZE);
    assert_eq!(open[1], MessageKind::StreamOpen.to_byte());

    let data = raw.try_next().await?.ok_or("transport closed")?;
    assert_eq!(data.len(), binmux::HEADER_SIZE + 3);
    assert_eq!(&data[binmux::HEADER_SIZE..], b"abc");

    Ok::<(), Box<dyn std::error::Error>>(())
});

test_with_timeout!(test_malformed_message_is_not_fatal, 10, {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let client = mux_over_messages(left, Role::Client)?;
    let mut raw = message_pipe(right);

    // Shorter than a header
    raw.send(Bytes::from_static(&[1, 2, 3])).await?;

    // A full frame followed by stray bytes
    let mut padded = BytesMut::new();
    padded.extend_from_slice(&binmux::Codec::new(Config::default()).encode_message(
        Message::End { id: 1 }.into_frame(1)?,
    )?);
    padded.extend_from_slice(b"??");
    raw.send(padded.freeze()).await?;

    let open = binmux::Codec::new(Config::default()).encode_message(
        Message::StreamOpen {
            id: 1,
            metadata: json!({"after": "garbage"}),
        }
        .into_frame(1)?,
    )?;
    raw.send(open).await?;

    let mut errors = Vec::new();
    loop {
        match client.next_event().await {
            Some(MultiplexerEvent::Open) => {}
            Some(MultiplexerEvent::Error(e)) => errors.push(e),
            Some(MultiplexerEvent::Stream(stream, metadata)) => {
                assert_eq!(stream.id(), 1);
                assert_eq!(metadata, json!({"after": "garbage"}));
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], MuxError::InsufficientData));
    assert!(matches!(errors[1], MuxError::InvalidFrame));
    assert!(!client.is_closed());

    Ok::<(), Box<dyn std::error::Error>>(())
});
