//! Frame and codec benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rtugate_protocol::function::READ_HOLDING_REGISTERS;
use rtugate_protocol::{crc16, BigEndian, ByteOrder, Framer, RtuFrame};

/// A read response carrying `words` register values.
fn read_response(words: usize) -> RtuFrame {
    let mut data = Vec::with_capacity(1 + words * 2);
    data.push((words * 2) as u8);
    for i in 0..words {
        data.extend_from_slice(&(i as u16).to_be_bytes());
    }
    let mut frame = RtuFrame::new(1, READ_HOLDING_REGISTERS);
    frame.set_data(Bytes::from(data));
    frame
}

fn bench_crc16(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16");

    for size in [8, 64, 256] {
        let data = vec![0xA5u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(crc16(data)));
        });
    }

    group.finish();
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for words in [1, 16, 125] {
        let frame = read_response(words);

        group.throughput(Throughput::Bytes(frame.encoded_len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(words), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode()));
        });
    }

    group.finish();
}

fn bench_frame_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");

    for words in [1, 16, 125] {
        let encoded = read_response(words).encode();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(words), &encoded, |b, encoded| {
            b.iter(|| black_box(RtuFrame::parse(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_write_request(c: &mut Criterion) {
    let values: Vec<u16> = (0..100).collect();

    c.bench_function("write_registers_request", |b| {
        b.iter(|| {
            let mut frame = RtuFrame::new(1, 0x10);
            frame
                .set_write_registers(0, values.len() as u16, black_box(&values))
                .unwrap();
            black_box(frame.encode())
        });
    });
}

fn bench_cursor_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor_decode");
    let bytes: Vec<u8> = (0..=255u8).collect();

    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("u16", |b| {
        b.iter(|| {
            let mut cursor = bytes.as_slice();
            black_box(BigEndian::decode_u16s(&mut cursor, 128).unwrap())
        });
    });
    group.bench_function("f32", |b| {
        b.iter(|| {
            let mut cursor = bytes.as_slice();
            black_box(BigEndian::decode_f32s(&mut cursor, 64).unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_crc16,
    bench_frame_encode,
    bench_frame_parse,
    bench_write_request,
    bench_cursor_decode,
);

criterion_main!(benches);
