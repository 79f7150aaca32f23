//! Throughput benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use iorelay_core::core::protocol::frame::{FrameDecoder, InboundFrame, DATA_BYTES, INBOUND_MARKER};
use iorelay_core::core::protocol::{crc16, crc16_bitwise};
use iorelay_core::core::routing::{RoutingEngine, RoutingTable};
use std::hint::black_box;

fn checksum_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("crc16");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("bitwise", |b| b.iter(|| black_box(crc16_bitwise(black_box(&data)))));
    group.bench_function("table", |b| b.iter(|| black_box(crc16(black_box(&data)))));

    group.finish();
}

fn status_frame() -> Vec<u8> {
    let mut raw = vec![INBOUND_MARKER];
    raw.extend((0..DATA_BYTES).map(|i| (i * 37 % 256) as u8));
    raw
}

fn routing_benchmark(c: &mut Criterion) {
    let mut table = RoutingTable::new();
    for bit in 0..192 {
        table.set_enabled(bit, true).unwrap();
        table.set_output(bit, 191 - bit).unwrap();
        table.set_latch(bit, bit % 3 == 0).unwrap();
    }
    let frame = InboundFrame::parse(status_frame()).unwrap();

    let mut group = c.benchmark_group("routing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("all_enabled", |b| {
        let mut engine = RoutingEngine::new(table.clone());
        b.iter(|| black_box(engine.process(black_box(&frame))))
    });

    group.bench_function("none_enabled", |b| {
        let mut engine = RoutingEngine::default();
        b.iter(|| black_box(engine.process(black_box(&frame))))
    });

    group.finish();
}

fn decoder_benchmark(c: &mut Criterion) {
    let mut stream = Vec::new();
    for _ in 0..64 {
        stream.extend_from_slice(&[0x00, 0x13]);
        stream.extend_from_slice(&status_frame());
    }

    let mut group = c.benchmark_group("decoder");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("noisy_stream", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::default();
            let frames: usize = stream.chunks(17).map(|chunk| decoder.push(chunk).len()).sum();
            black_box(frames)
        })
    });

    group.finish();
}

criterion_group!(benches, checksum_benchmark, routing_benchmark, decoder_benchmark);
criterion_main!(benches);
