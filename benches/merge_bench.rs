//! Benchmarks for the merge kernels and backends

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use segmerge::kernel::{AcceleratorKernel, MergeKernel, ParallelKernel, SequentialKernel, SweepMode};
use segmerge::prelude::*;

fn generate_test_raster(size: usize) -> Raster {
    // Gradient plateaus with a diagonal stripe, so regions cross band edges
    Raster::from_fn(size, size, |x, y| {
        let plateau = ((x / 16) * 40 + (y / 16) * 3) as u8;
        if (x + y) % 64 < 4 {
            plateau.wrapping_add(128)
        } else {
            plateau
        }
    })
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_to_fixed_point");
    group.sample_size(20);

    let threshold = Threshold::default();
    let sequential = SequentialKernel::new(threshold, UnificationPolicy::MinSwap);
    let parallel = ParallelKernel::new(threshold, UnificationPolicy::MinSwap);
    let locked = ParallelKernel::new(threshold, UnificationPolicy::FullPropagation);
    let kernels: Vec<(&str, &dyn MergeKernel)> = vec![
        ("sequential", &sequential),
        ("parallel_min_swap", &parallel),
        ("parallel_full_propagation", &locked),
    ];

    for size in [64, 128, 256].iter() {
        let raster = generate_test_raster(*size);
        for (name, kernel) in &kernels {
            group.bench_with_input(BenchmarkId::new(*name, size), size, |b, &size| {
                b.iter(|| {
                    let mut labels: Vec<Label> = (0..raster.len() as Label).collect();
                    kernel
                        .merge(black_box(raster.pixels()), &mut labels, size, SweepMode::ToFixedPoint)
                        .unwrap();
                    labels
                })
            });
        }
    }

    group.finish();
}

fn bench_accelerator(c: &mut Criterion) {
    let kernel = AcceleratorKernel::new(Threshold::default(), UnificationPolicy::MinSwap, 0).unwrap();
    if !kernel.is_offloaded() {
        eprintln!("No GPU adapter, skipping accelerator benchmark");
        return;
    }

    let mut group = c.benchmark_group("accelerator");
    group.sample_size(10);
    for size in [256, 512].iter() {
        let raster = generate_test_raster(*size);
        group.bench_with_input(BenchmarkId::new("min_swap", size), size, |b, &size| {
            b.iter(|| {
                let mut labels: Vec<Label> = (0..raster.len() as Label).collect();
                kernel
                    .merge(black_box(raster.pixels()), &mut labels, size, SweepMode::ToFixedPoint)
                    .unwrap();
                labels
            })
        });
    }
    group.finish();
}

fn bench_backends(c: &mut Criterion) {
    let mut group = c.benchmark_group("backends");
    group.sample_size(10);

    let raster = generate_test_raster(256);
    let configs = [
        ("shared_memory", SegmentConfig::new().with_backend(Backend::SharedMemory)),
        ("distributed_4_fixed", SegmentConfig::new().with_workers(4)),
        (
            "distributed_4_stable",
            SegmentConfig::new()
                .with_workers(4)
                .with_convergence(ConvergencePolicy::change_driven()),
        ),
    ];

    for (name, config) in configs {
        let engine = SegmentationEngine::new(config);
        group.bench_function(name, |b| b.iter(|| engine.run(black_box(&raster)).unwrap()));
    }

    group.finish();
}

criterion_group!(benches, bench_kernels, bench_accelerator, bench_backends);
criterion_main!(benches);
