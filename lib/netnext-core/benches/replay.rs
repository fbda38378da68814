#[macro_use]
extern crate criterion;
extern crate netnext_core;
extern crate rand;

use criterion::black_box;
use criterion::Criterion;
use netnext_core::replay::ReplayProtection;
use rand::prelude::*;

/// Hot path: every payload packet runs `already_received` and, if it passes every other check,
/// `advance`. In-order traffic is the common case.
fn in_order_bench(c: &mut Criterion) {
    let mut protection = ReplayProtection::new();

    c.bench_function("replay in-order advance", move |b| {
        let mut sequence = 0u64;
        b.iter(|| {
            sequence += 1;
            let accepted = !protection.already_received(sequence);
            if accepted {
                protection.advance(sequence);
            }
            black_box(accepted);
        })
    });
}

/// Worst case for the window check: sequences scattered across the last 1024-entry span, mostly
/// landing inside the window but out of order.
fn scattered_window_bench(c: &mut Criterion) {
    let mut protection = ReplayProtection::new();
    protection.advance(1_000_000);

    let mut rng = StdRng::seed_from_u64(7);
    let sequences: Vec<u64> = (0..10_000)
        .map(|_| 1_000_000 - rng.gen_range(0, 1024))
        .collect();

    c.bench_function("replay scattered window", move |b| {
        b.iter(|| {
            for &sequence in &sequences {
                black_box(protection.already_received(sequence));
            }
        })
    });
}

criterion_group!(benches, in_order_bench, scattered_window_bench);
criterion_main!(benches);
