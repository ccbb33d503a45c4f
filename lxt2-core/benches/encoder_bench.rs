//! Benchmarks for the LXT2 encoder
//!
//! Compares delta coding paths and direct vs worker-thread writing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use lxt2_core::delta;
use lxt2_core::storage::MemoryStorage;
use lxt2_core::{SignalFlags, SignalId, Trace, TraceConfig, TraceWorker, WorkerConfig};

fn build_trace(signals: usize, config: TraceConfig) -> (Trace, Vec<SignalId>) {
    let mut trace = Trace::with_storage(MemoryStorage::new(), config).unwrap();
    let ids = (0..signals)
        .map(|i| {
            trace
                .add(&format!("top.u{}.bus", i), 0, 15, 0, SignalFlags::BITS)
                .unwrap()
        })
        .collect();
    (trace, ids)
}

fn bench_delta_choose(c: &mut Criterion) {
    let old = b"0000000011110000";
    let shifted = b"0000000111100000";
    let counted = b"0000000011110001";
    let literal = b"0110100111010011";

    c.bench_function("delta_shift", |b| {
        b.iter(|| black_box(delta::choose(Some(old), shifted)))
    });
    c.bench_function("delta_add", |b| {
        b.iter(|| black_box(delta::choose(Some(old), counted)))
    });
    c.bench_function("delta_literal", |b| {
        b.iter(|| black_box(delta::choose(Some(old), literal)))
    });
}

fn bench_counter_trace(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_trace");

    for &signals in &[16usize, 256] {
        group.bench_function(BenchmarkId::new("direct", signals), |b| {
            b.iter(|| {
                let (mut trace, ids) = build_trace(signals, TraceConfig::default());
                for t in 0..1000u64 {
                    trace.set_time64(t).unwrap();
                    for (i, &id) in ids.iter().enumerate() {
                        trace.emit_int(id, (t as i32).wrapping_mul(i as i32 + 1));
                    }
                }
                black_box(trace.close().unwrap())
            })
        });

        group.bench_function(BenchmarkId::new("partial_zip", signals), |b| {
            b.iter(|| {
                let mut config = TraceConfig::default().with_partial(true);
                if let Some(partial) = config.partial.as_mut() {
                    partial.size = 8;
                }
                let (mut trace, ids) = build_trace(signals, config);
                for t in 0..1000u64 {
                    trace.set_time64(t).unwrap();
                    for (i, &id) in ids.iter().enumerate() {
                        trace.emit_int(id, (t as i32).wrapping_mul(i as i32 + 1));
                    }
                }
                black_box(trace.close().unwrap())
            })
        });
    }

    group.finish();
}

fn bench_worker(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker");

    group.bench_function(BenchmarkId::new("queued", "64_signals"), |b| {
        b.iter(|| {
            let (trace, ids) = build_trace(64, TraceConfig::default());
            let mut worker = TraceWorker::spawn(trace, WorkerConfig::default()).unwrap();
            for t in 0..500u64 {
                worker.set_time(t);
                for &id in &ids {
                    let bits = if t % 2 == 0 { "0101" } else { "1010" };
                    worker.emit_bits(id, bits).unwrap();
                }
            }
            let trace = worker.finish().unwrap();
            black_box(trace.close().unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_delta_choose, bench_counter_trace, bench_worker);
criterion_main!(benches);
