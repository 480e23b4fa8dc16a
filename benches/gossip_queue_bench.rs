use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use swim_membership::address::Address;
use swim_membership::gossip::GossipQueue;
use swim_membership::numeric::IncarnationNumber;
use swim_membership::wire::Message;

fn addr(i: u16) -> Address {
    Address::new(format!("10.0.{}.{}:7946", i / 255, i % 255 + 1).parse().unwrap()).unwrap()
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("gossip_queue_add");
    for size in [16usize, 128, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut queue = GossipQueue::new(6, size);
                for i in 0..size as u16 {
                    queue.add(Message::Alive { destination: addr(i), incarnation: IncarnationNumber::ZERO });
                }
            });
        });
    }
    group.finish();
}

fn bench_mark_transmitted(c: &mut Criterion) {
    let mut group = c.benchmark_group("gossip_queue_mark_transmitted");
    for size in [16usize, 128, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut queue = GossipQueue::new(6, size);
                for i in 0..size as u16 {
                    queue.add(Message::Alive { destination: addr(i), incarnation: IncarnationNumber::ZERO });
                }
                queue.mark_transmitted(size);
            });
        });
    }
    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("gossip_queue_iterate");
    for size in [16usize, 128, 1024] {
        let mut queue = GossipQueue::new(6, size);
        for i in 0..size as u16 {
            queue.add(Message::Alive { destination: addr(i), incarnation: IncarnationNumber::ZERO });
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| queue.iterate().count());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add, bench_mark_transmitted, bench_iterate);
criterion_main!(benches);
