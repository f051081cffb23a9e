//! Criterion benchmarks for the frame differs and the coalescer.
//!
//! Run: cargo bench -p framediff --bench diff
//!
//! Results show:
//!   diff/{exact,coarse}/* per-frame diff cost for sparse and dense changes
//!   coalesce_dense        greedy merge pass over a noisy 240x320 frame

#![allow(
    clippy::unwrap_used, // benchmark helpers use unwrap for brevity
    clippy::expect_used,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    missing_docs, // criterion_group! macro generates undocumented items
)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use framediff::{CoarseDiffer, ExactDiffer, FrameDiffer, Scan, SpanList, coalesce};
use platform::Framebuffer;

const WIDTH: usize = 240;
const HEIGHT: usize = 320;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A frame pair where roughly one pixel in `every` differs.
fn frame_pair(every: u64) -> (Framebuffer, Framebuffer) {
    let prev = Framebuffer::new(WIDTH, HEIGHT, WIDTH * 2).unwrap();
    let mut cur = prev.clone();
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    for px in cur.pixels_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        if state % every == 0 {
            *px = (state >> 32) as u16 | 1;
        }
    }
    (cur, prev)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    let differs: [(&str, Box<dyn FrameDiffer>); 2] =
        [("exact", Box::new(ExactDiffer::new(4))), ("coarse", Box::new(CoarseDiffer))];

    for (label, every) in [("sparse", 997u64), ("dense", 7)] {
        let (cur, prev) = frame_pair(every);
        let mut spans = SpanList::for_frame(WIDTH, HEIGHT);
        for (name, differ) in &differs {
            group.bench_with_input(BenchmarkId::new(*name, label), &(), |b, ()| {
                b.iter(|| differ.diff(black_box(&cur), black_box(&prev), Scan::Progressive, &mut spans).unwrap());
            });
        }
    }
    group.finish();
}

fn bench_coalesce(c: &mut Criterion) {
    let (cur, prev) = frame_pair(11);
    let differ = ExactDiffer::new(4);
    let mut spans = SpanList::for_frame(WIDTH, HEIGHT);

    c.bench_function("coalesce_dense", |b| {
        b.iter(|| {
            differ.diff(&cur, &prev, Scan::Progressive, &mut spans).unwrap();
            coalesce(black_box(&mut spans), 4, 65_528, 2)
        });
    });
}

criterion_group!(benches, bench_diff, bench_coalesce);
criterion_main!(benches);
