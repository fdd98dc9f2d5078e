//! Tree writes, accessor reads, dilation and trilinear sampling.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vdbgrid::tools::{BoxSampler, Connectivity, GridSampler, MorphologyConfig, dilate_active_values};
use vdbgrid::{Coord, CoordBBox, Tree};

fn random_coords(n: usize, extent: i32) -> Vec<Coord> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| {
            Coord::new(
                rng.random_range(-extent..extent),
                rng.random_range(-extent..extent),
                rng.random_range(-extent..extent),
            )
        })
        .collect()
}

fn filled_tree(extent: i32) -> Tree<f32> {
    let mut tree = Tree::new(0.0f32);
    let mut acc = tree.accessor_mut();
    for xyz in CoordBBox::new(Coord::splat(-extent), Coord::splat(extent - 1)) {
        acc.set_value(xyz, (xyz.x + xyz.y + xyz.z) as f32);
    }
    tree
}

fn bench_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_writes");
    for n in [10_000usize, 100_000] {
        let coords = random_coords(n, 512);
        group.bench_with_input(BenchmarkId::new("set_value", n), &coords, |b, coords| {
            b.iter(|| {
                let mut tree = Tree::new(0.0f32);
                for &xyz in coords {
                    tree.set_value(xyz, 1.0);
                }
                black_box(tree.leaf_count())
            })
        });
        group.bench_with_input(BenchmarkId::new("accessor_set_value", n), &coords, |b, coords| {
            b.iter(|| {
                let mut tree = Tree::new(0.0f32);
                let mut acc = tree.accessor_mut();
                for &xyz in coords {
                    acc.set_value(xyz, 1.0);
                }
                black_box(tree.leaf_count())
            })
        });
    }
    group.finish();
}

fn bench_reads(c: &mut Criterion) {
    let tree = filled_tree(32);
    let coords = random_coords(100_000, 40);
    c.bench_function("accessor_reads (64³ dense block)", |b| {
        b.iter(|| {
            let acc = tree.accessor();
            coords.iter().map(|&xyz| acc.value(xyz)).sum::<f32>()
        })
    });
    c.bench_function("tree_reads (64³ dense block)", |b| {
        b.iter(|| coords.iter().map(|&xyz| tree.value(xyz)).sum::<f32>())
    });
}

fn bench_dilation(c: &mut Criterion) {
    let coords = random_coords(20_000, 256);
    let mut seed = Tree::new(0.0f32);
    for &xyz in &coords {
        seed.set_value(xyz, 1.0);
    }
    let mut group = c.benchmark_group("dilation");
    for grain in [0usize, 1] {
        let config = MorphologyConfig::new(2, Connectivity::FaceEdgeVertex).with_grain_size(grain);
        group.bench_with_input(BenchmarkId::new("grain", grain), &config, |b, config| {
            b.iter(|| {
                let mut tree = seed.clone();
                let _ = dilate_active_values(&mut tree, config);
                black_box(tree.active_voxel_count())
            })
        });
    }
    group.finish();
}

fn bench_sampling(c: &mut Criterion) {
    let tree = filled_tree(32);
    let sampler = GridSampler::<_, BoxSampler>::new(&tree);
    let mut rng = StdRng::seed_from_u64(7);
    let points: Vec<DVec3> = (0..50_000)
        .map(|_| {
            DVec3::new(
                rng.random_range(-30.0..30.0),
                rng.random_range(-30.0..30.0),
                rng.random_range(-30.0..30.0),
            )
        })
        .collect();
    c.bench_function("trilinear_sampling", |b| {
        b.iter(|| points.iter().map(|&p| sampler.is_sample(p)).sum::<f32>())
    });
}

criterion_group!(benches, bench_writes, bench_reads, bench_dilation, bench_sampling);
criterion_main!(benches);
