//! Benchmarks for the reactive core
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use strata_core::{
    create_effect, create_memo, create_signal, create_store, flush, ReconcileOptions, StorePath,
};

fn bench_signal_create(c: &mut Criterion) {
    c.bench_function("signal_create", |b| {
        b.iter(|| black_box(create_signal(0i32)))
    });
}

fn bench_signal_get(c: &mut Criterion) {
    let (read, _write) = create_signal(42i32);
    c.bench_function("signal_get", |b| b.iter(|| black_box(read.get())));
}

fn bench_signal_set_changed(c: &mut Criterion) {
    let (_read, write) = create_signal(0i32);
    let mut value = 0i32;
    c.bench_function("signal_set_changed", |b| {
        b.iter(|| {
            value = value.wrapping_add(1);
            write.set(black_box(value));
        })
    });
}

fn bench_signal_set_same_value(c: &mut Criterion) {
    let (_read, write) = create_signal(42i32);
    c.bench_function("signal_set_same_value", |b| {
        b.iter(|| write.set(black_box(42)))
    });
}

fn bench_memo_chain_revalidate(c: &mut Criterion) {
    let (read, write) = create_signal(0i64);
    let mut current = create_memo(move || read.get() + 1);
    for _ in 0..9 {
        let previous = current;
        current = create_memo(move || previous.get() + 1);
    }
    let tail = current;

    let mut value = 0i64;
    c.bench_function("memo_chain_10_deep", |b| {
        b.iter(|| {
            value += 1;
            write.set(value);
            black_box(tail.get())
        })
    });
}

fn bench_diamond_flush(c: &mut Criterion) {
    let (read, write) = create_signal(0i64);
    let left = create_memo(move || read.get() + 1);
    let right = create_memo(move || read.get() * 2);
    create_effect(move || left.get() + right.get(), |total| {
        black_box(*total);
    });

    let mut value = 0i64;
    c.bench_function("diamond_write_and_flush", |b| {
        b.iter(|| {
            value += 1;
            write.set(value);
            flush().expect("flush succeeds");
        })
    });
}

fn bench_store_reconcile_middle_edit(c: &mut Criterion) {
    let items: Vec<i64> = (0..100).collect();
    let (store, setter) = create_store(json!(items));
    // Materialize a few per-item signals.
    for i in [0usize, 25, 50, 75, 99] {
        let _ = store.get(&StorePath::root().index(i));
    }

    let mut toggle = false;
    c.bench_function("store_reconcile_100_one_edit", |b| {
        b.iter(|| {
            toggle = !toggle;
            let mut next: Vec<i64> = (0..100).collect();
            next[50] = if toggle { -1 } else { 50 };
            setter.reconcile(json!(next), ReconcileOptions::default());
        })
    });
}

criterion_group!(
    benches,
    bench_signal_create,
    bench_signal_get,
    bench_signal_set_changed,
    bench_signal_set_same_value,
    bench_memo_chain_revalidate,
    bench_diamond_flush,
    bench_store_reconcile_middle_edit,
);
criterion_main!(benches);
