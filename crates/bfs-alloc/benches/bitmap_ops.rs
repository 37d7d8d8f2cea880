//! Benchmark: bitmap scans at container scale.
//!
//! The allocator's first-fit scan is O(n) over one 4096-byte bitmap page;
//! these benches keep an eye on the worst case (nearly full bitmap, free
//! bits only near the end).

use bfs_alloc::{bitmap_count_free, bitmap_find_free};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

/// A nearly full bitmap: 32768 bits with a handful of free runs near the end.
fn make_bitmap() -> Vec<u8> {
    let mut bm = vec![0xFF_u8; 4096];
    let mut pos = 30_000_usize;
    while pos + 16 < 32_768 {
        for i in pos..pos + 16 {
            bm[i / 8] &= !(1 << (i % 8));
        }
        pos += 700;
    }
    bm
}

fn bench_count_free(c: &mut Criterion) {
    let bm = make_bitmap();
    c.bench_function("bitmap_count_free_32768", |b| {
        b.iter(|| black_box(bitmap_count_free(black_box(&bm), 32_768)));
    });
}

fn bench_find_free(c: &mut Criterion) {
    let bm = make_bitmap();
    c.bench_function("bitmap_find_free_worst_case", |b| {
        b.iter(|| black_box(bitmap_find_free(black_box(&bm), 32_768)));
    });
}

criterion_group!(benches, bench_count_free, bench_find_free);
criterion_main!(benches);
