//! Throughput benchmarks for the reclamation fast paths

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quiesce::{List, Rcu, Reader};

fn bench_read_section(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_section");
    let reader = Reader::new();

    group.bench_function("enter_exit", |b| {
        b.iter(|| {
            let section = reader.enter();
            black_box(&section);
        });
    });

    group.bench_function("nested_enter_exit", |b| {
        b.iter(|| {
            let outer = reader.enter();
            let inner = reader.enter();
            black_box((&outer, &inner));
        });
    });

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let reader = Reader::new();
    let list = List::new();
    for key in (0..1024u32).step_by(2) {
        assert!(list.toggle(key).is_none());
    }

    for probe in [0u32, 512, 1022, 1023].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(probe), probe, |b, &key| {
            b.iter(|| {
                let section = reader.enter();
                black_box(list.lookup(key, &section))
            });
        });
    }

    group.finish();
}

fn bench_toggle_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("toggle_churn");
    group.throughput(Throughput::Elements(2));

    let rcu = Rcu::new();
    rcu.start_background();
    let list = List::new();

    // Each iteration inserts and unlinks one key, feeding the reclaimer.
    group.bench_function("insert_remove_retire", |b| {
        b.iter(|| {
            assert!(list.toggle(7).is_none());
            let node = list.toggle(7).unwrap();
            unsafe { rcu.retire(node.as_ptr()).unwrap() };
        });
    });

    group.finish();
    rcu.stop_background();
}

criterion_group!(
    benches,
    bench_read_section,
    bench_lookup,
    bench_toggle_churn
);
criterion_main!(benches);
