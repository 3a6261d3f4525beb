//! Benchmarks for index bulk-loading and tile selection

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mosaico::{MemorySource, Mosaic, Rect, SpatialIndex, Subsampling, TileDescriptor};

/// A `size` x `size` lattice of 256px tiles plus two overview levels.
fn create_pyramid(size: i64) -> Vec<TileDescriptor> {
    let source = Arc::new(MemorySource::new("bench", vec![0u8; 16]));
    let mut tiles = Vec::new();

    for (factor, step) in [(1u32, 256i64), (4, 1024), (16, 4096)] {
        let count = (size * 256).div_euclid(step).max(1);
        for row in 0..count {
            for col in 0..count {
                tiles.push(TileDescriptor::new(
                    format!("L{factor}/{row}/{col}"),
                    Rect::new(col * step, row * step, (col + 1) * step, (row + 1) * step).unwrap(),
                    Subsampling::uniform(factor).unwrap(),
                    source.clone(),
                ));
            }
        }
    }
    tiles
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");

    for size in [16i64, 64, 128].iter() {
        let tiles = create_pyramid(*size);
        let items: Vec<_> = tiles.iter().enumerate().map(|(k, t)| (k, *t.extent())).collect();

        group.bench_with_input(BenchmarkId::new("str_tree", tiles.len()), size, |b, _| {
            b.iter(|| SpatialIndex::build(black_box(items.iter().copied()), 8, 8).unwrap())
        });
    }

    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    let mosaic = Mosaic::open(create_pyramid(64)).unwrap();
    let region = Rect::new(1000, 1000, 5096, 5096).unwrap();

    for factor in [1u32, 4, 16].iter() {
        let target = Subsampling::uniform(*factor).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(factor), factor, |b, _| {
            b.iter(|| mosaic.plan(black_box(&region), target).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_plan);
criterion_main!(benches);
