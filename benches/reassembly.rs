//! Reassembly performance benchmarks
//!
//! Measures how fast the state machine turns raw stream chunks into packages.

use std::io::{self, Read};

use citron::handler::RequestHandler;
use citron::protocol::{PackageHeader, PackageWriter, ProtocolId, Reassembler, Result};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

/// Counts body bytes and answers nothing.
struct CountingHandler {
    seen: usize,
}

impl RequestHandler for CountingHandler {
    fn write(&mut self, body: &[u8]) -> Result<usize> {
        self.seen += body.len();
        Ok(body.len())
    }

    fn reset(&mut self) {}

    fn on_package_complete(&mut self, _writer: &mut dyn PackageWriter) -> Result<()> {
        Ok(())
    }
}

struct SinkWriter;

impl PackageWriter for SinkWriter {
    fn write_package(&mut self, _length: i64, body: &mut dyn Read) -> Result<()> {
        io::copy(body, &mut io::sink())?;
        Ok(())
    }
}

fn stream_of(protocol: ProtocolId, body_len: usize, packages: usize) -> Vec<u8> {
    let header: PackageHeader = protocol.header(i64::try_from(body_len).unwrap());
    let mut stream = Vec::with_capacity((body_len + 16) * packages);
    for _ in 0..packages {
        stream.extend_from_slice(&header.encode());
        stream.extend(std::iter::repeat_n(0xA5u8, body_len));
    }
    stream
}

/// Benchmark feeding a pipelined stream at various chunk sizes
fn bench_feed(c: &mut Criterion) {
    let protocol = ProtocolId::default();
    let stream = stream_of(protocol, 1024, 64);

    let mut group = c.benchmark_group("reassembly_feed");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk_size in [7usize, 512, 4096, 32 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let mut reassembler =
                        Reassembler::new(protocol, CountingHandler { seen: 0 });
                    let mut completed = 0;
                    for chunk in stream.chunks(chunk_size) {
                        completed += reassembler.feed(black_box(chunk), &mut SinkWriter).unwrap();
                    }
                    black_box(completed);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark header encode/decode
fn bench_header(c: &mut Criterion) {
    let header = ProtocolId::default().header(4096);
    let encoded = header.encode();

    let mut group = c.benchmark_group("header");
    group.bench_function("encode", |b| b.iter(|| black_box(black_box(&header).encode())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(PackageHeader::decode(black_box(&encoded)).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_feed, bench_header);
criterion_main!(benches);
