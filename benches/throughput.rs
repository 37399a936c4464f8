use binmux::{Codec, Config, Frame, Multiplexer, Stream, StreamEvent};
use bytes::{Bytes, BytesMut};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;
use tokio_util::codec::{Decoder, Encoder};

const CHUNK_SIZE: usize = 16 * 1024;
const PAYLOAD_SIZE: usize = 1024 * 1024; // 1MB

fn create_mux_pair() -> (Multiplexer, Multiplexer) {
    let (client_transport, server_transport) = tokio::io::duplex(8 * 1024 * 1024); // 8MB buffer
    let config = Config::default();
    let client = Multiplexer::client(client_transport, config.clone()).unwrap();
    let server = Multiplexer::server(server_transport, config).unwrap();
    (client, server)
}

async fn drain_stream(stream: Stream) -> u64 {
    let mut received = 0u64;
    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::Data(chunk) => received += chunk.len() as u64,
            StreamEvent::End | StreamEvent::Close => break,
            _ => {}
        }
    }
    received
}

// Whole buffer through the chunked producer
async fn chunked_send(data: Bytes) -> u64 {
    let (client, server) = create_mux_pair();

    client.send(data, json!({"type": "bench"})).await.unwrap();
    let (stream, _) = server.accept_stream().await.unwrap();
    let received = drain_stream(stream).await;

    client.close();
    server.close();
    received
}

// Caller-driven writes on one stream
async fn direct_writes(data: Bytes) -> u64 {
    let (client, server) = create_mux_pair();
    let stream = client.create_stream(json!(null)).await.unwrap();
    let (accepted, _) = server.accept_stream().await.unwrap();

    let reader = tokio::spawn(drain_stream(accepted));

    let mut offset = 0;
    while offset < data.len() {
        let end = data.len().min(offset + CHUNK_SIZE);
        if !stream.write(data.slice(offset..end)).await.unwrap() {
            stream.drained().await;
        }
        offset = end;
    }
    stream.end().await.unwrap();

    let received = reader.await.unwrap();
    client.close();
    server.close();
    received
}

// Bare duplex pipe for comparison
async fn raw_duplex(data: Bytes) -> u64 {
    let (mut client, mut server) = tokio::io::duplex(8 * 1024 * 1024);

    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            match server.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n as u64,
            }
        }
        total
    });

    client.write_all(&data).await.unwrap();
    client.shutdown().await.unwrap();
    drop(client);

    reader.await.unwrap()
}

fn bench_stream_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let data = Bytes::from(vec![42u8; PAYLOAD_SIZE]);

    let mut group = c.benchmark_group("stream_throughput");
    group.sample_size(10);
    group.measurement_time(std::time::Duration::from_secs(5));
    group.throughput(Throughput::Bytes(PAYLOAD_SIZE as u64));

    group.bench_function("chunked_send_1MB", |b| {
        b.iter(|| rt.block_on(async { black_box(chunked_send(data.clone()).await) }))
    });
    group.bench_function("direct_writes_1MB", |b| {
        b.iter(|| rt.block_on(async { black_box(direct_writes(data.clone()).await) }))
    });
    group.bench_function("raw_duplex_1MB", |b| {
        b.iter(|| rt.block_on(async { black_box(raw_duplex(data.clone()).await) }))
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut codec = Codec::new(Config::default());
    let frame = Frame::new_data(1, 7, Bytes::from(vec![1u8; CHUNK_SIZE]));

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(frame.total_size() as u64));

    group.bench_function("encode_decode_16KB", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(frame.total_size());
            codec.encode(frame.clone(), &mut buf).unwrap();
            black_box(codec.decode(&mut buf).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_stream_throughput, bench_codec);
criterion_main!(benches);
