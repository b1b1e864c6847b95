//! Frame parser and encoder throughput.
//!
//! Run with `cargo bench --bench parser_benchmark`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use wsengine::net::websocket::{FeedOutcome, FrameEncoder, MessageParser, Opcode};

const SIZES: [usize; 4] = [16, 1024, 16 * 1024, 1024 * 1024];

fn decode_all(parser: &mut MessageParser, buf: &[u8]) -> usize {
    let mut cursor = 0;
    let mut total = 0;
    loop {
        let feed = parser.feed(buf, cursor);
        cursor = feed.cursor;
        match feed.outcome {
            FeedOutcome::MessageReady => {
                total += parser.take_message().map_or(0, |m| m.len());
            }
            FeedOutcome::NeedMoreData | FeedOutcome::ProtocolError(_) => return total,
        }
    }
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for size in SIZES {
        let payload = vec![0xA5u8; size];
        let bytes = FrameEncoder::client()
            .encode(Opcode::Binary, &payload)
            .expect("encodable");
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("whole", size), &bytes, |b, bytes| {
            let mut parser = MessageParser::server(MessageParser::DEFAULT_MAX_MESSAGE_SIZE);
            b.iter(|| decode_all(&mut parser, black_box(bytes)));
        });

        group.bench_with_input(BenchmarkId::new("chunked_1400", size), &bytes, |b, bytes| {
            let mut parser = MessageParser::server(MessageParser::DEFAULT_MAX_MESSAGE_SIZE);
            b.iter(|| {
                bytes
                    .chunks(1400)
                    .map(|chunk| decode_all(&mut parser, black_box(chunk)))
                    .sum::<usize>()
            });
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let encoder = FrameEncoder::server();
    for size in SIZES {
        let payload = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("single", size), &payload, |b, payload| {
            b.iter(|| encoder.encode(Opcode::Binary, black_box(payload)));
        });
        group.bench_with_input(BenchmarkId::new("fragmented_1400", size), &payload, |b, payload| {
            b.iter(|| encoder.encode_fragmented(Opcode::Binary, black_box(payload), 1400));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_encode);
criterion_main!(benches);
