use callgate_core::{Gate, GateConfig, Local, StorageKind};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

fn make_gate(name: &str, frames: usize) -> Gate<Local> {
    let cfg = GateConfig::new(name, frames as f64, 1.0).with_storage_kind(StorageKind::Simple);
    Gate::new(cfg, Local::new(name, frames, None)).unwrap()
}

fn bench_single_thread_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_single_thread");
    group.throughput(Throughput::Elements(1));

    group.bench_function("uncontended", |b| {
        let gate = make_gate("bench", 60);
        b.iter(|| {
            gate.update(black_box(1), false).unwrap();
        });
    });

    group.finish();
}

fn bench_contended_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_contended");

    for threads in [2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*threads as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &n| {
            b.iter(|| {
                let gate = Arc::new(make_gate("bench", 600));
                let mut handles = Vec::with_capacity(n);
                for _ in 0..n {
                    let g = Arc::clone(&gate);
                    handles.push(thread::spawn(move || {
                        for _ in 0..1_000 {
                            let _ = g.update(black_box(1), false);
                        }
                    }));
                }
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread_update, bench_contended_update);
criterion_main!(benches);
