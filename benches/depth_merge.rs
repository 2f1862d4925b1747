//! Benchmark of the depth merge hot path: one diff batch merged into a
//! full side.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use bookstream::book::{Ladder, PriceLevel, Side};

fn full_bid_side() -> Ladder {
    let mut ladder = Ladder::new(Side::Bid, 5000);
    ladder.load(
        (0..5000)
            .map(|i| PriceLevel::new(100_000.0 - i as f64 * 0.1, 1.0))
            .collect(),
    );
    ladder
}

fn diff_batch(len: usize) -> Vec<PriceLevel> {
    // A mix of replacements, inserts between existing levels, and deletes.
    (0..len)
        .map(|i| {
            let price = 100_000.0 - i as f64 * 0.35;
            let quantity = if i % 5 == 0 { 0.0 } else { 2.0 };
            PriceLevel::new(price, quantity)
        })
        .collect()
}

fn bench_depth_merge(c: &mut Criterion) {
    let base = full_bid_side();

    for batch_len in [10usize, 100, 1000] {
        let batch = diff_batch(batch_len);
        c.bench_function(&format!("merge_{batch_len}_deltas_into_5000_levels"), |b| {
            b.iter(|| {
                let mut ladder = base.clone();
                ladder.apply(black_box(&batch)).unwrap();
                ladder
            })
        });
    }
}

criterion_group!(benches, bench_depth_merge);
criterion_main!(benches);
