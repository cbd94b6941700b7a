use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use lludp_protocol::packet::{MessageId, Packet};
use lludp_protocol::sequence::SequenceCounter;
use lludp_protocol::zerocode;
use lludp_protocol::PacketAck;

fn sample_body() -> Bytes {
    // Object update style payload: mostly zeros with scattered values
    let mut body = vec![0u8; 600];
    for (i, b) in body.iter_mut().enumerate().step_by(7) {
        *b = (i % 251) as u8 + 1;
    }
    Bytes::from(body)
}

fn bench_packet_serialize(c: &mut Criterion) {
    let mut packet = Packet::new(MessageId::High(12), sample_body()).reliable();
    packet.header.sequence = 1000;
    packet.header.ack_list = vec![1, 2, 3, 4, 5];

    c.bench_function("packet_serialize", |b| {
        b.iter(|| {
            let bytes = black_box(&packet).to_bytes().unwrap();
            black_box(bytes);
        });
    });
}

fn bench_packet_deserialize(c: &mut Criterion) {
    let mut packet = Packet::new(MessageId::Low(300), sample_body()).reliable();
    packet.header.sequence = 1000;
    packet.header.ack_list = vec![1, 2, 3];
    let bytes = packet.to_bytes().unwrap();

    c.bench_function("packet_deserialize", |b| {
        b.iter(|| {
            let packet = Packet::from_bytes(black_box(&bytes)).unwrap();
            black_box(packet);
        });
    });
}

fn bench_zerocoded_roundtrip(c: &mut Criterion) {
    let mut packet = Packet::new(MessageId::Medium(4), sample_body()).zerocoded();
    packet.header.sequence = 77;

    c.bench_function("zerocoded_packet_roundtrip", |b| {
        b.iter(|| {
            let bytes = black_box(&packet).to_bytes().unwrap();
            let decoded = Packet::from_bytes(&bytes).unwrap();
            black_box(decoded);
        });
    });
}

fn bench_zerocode(c: &mut Criterion) {
    let body = sample_body();
    let mut encoded = BytesMut::new();
    zerocode::encode(&body, &mut encoded);

    let mut group = c.benchmark_group("zerocode");
    group.throughput(Throughput::Bytes(body.len() as u64));

    group.bench_function("encode", |b| {
        b.iter(|| {
            let mut dst = BytesMut::with_capacity(body.len());
            zerocode::encode(black_box(&body), &mut dst);
            black_box(dst);
        });
    });

    group.bench_function("decode", |b| {
        b.iter(|| {
            let mut dst = BytesMut::with_capacity(body.len());
            zerocode::decode(black_box(&encoded), &mut dst).unwrap();
            black_box(dst);
        });
    });

    group.finish();
}

fn bench_packet_ack(c: &mut Criterion) {
    let ack = PacketAck::new((1..=10).collect());

    c.bench_function("packet_ack_build", |b| {
        b.iter(|| {
            let bytes = black_box(&ack).to_packet().unwrap().to_bytes().unwrap();
            black_box(bytes);
        });
    });
}

fn bench_sequence_next(c: &mut Criterion) {
    c.bench_function("sequence_next", |b| {
        let mut seq = SequenceCounter::new();
        b.iter(|| {
            black_box(seq.next());
        });
    });
}

criterion_group!(
    benches,
    bench_packet_serialize,
    bench_packet_deserialize,
    bench_zerocoded_roundtrip,
    bench_zerocode,
    bench_packet_ack,
    bench_sequence_next
);
criterion_main!(benches);
