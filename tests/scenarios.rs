//! End-to-end segmentation scenarios across the three backends.

use segmerge::prelude::*;
use segmerge::validation::region_count;

fn run(raster: &Raster, config: SegmentConfig) -> Segmentation {
    SegmentationEngine::new(config).run(raster).unwrap()
}

fn hard_edge() -> Raster {
    Raster::from_fn(4, 4, |x, _| if x < 2 { 0 } else { 250 })
}

#[test]
fn test_uniform_raster_fully_merges_across_two_workers() {
    let raster = Raster::filled(4, 4, 0);
    let config = SegmentConfig::new()
        .with_workers(2)
        .with_threshold(Threshold::new(10).unwrap())
        .with_convergence(ConvergencePolicy::fixed(5));
    let result = run(&raster, config);

    let first = result.output.pixels()[0];
    assert!(result.output.pixels().iter().all(|&p| p == first));
    assert_eq!(result.region_count(), 1);
    assert_eq!(result.stats.rounds, 5);
    assert!(result.stats.converged);
}

#[test]
fn test_hard_edge_keeps_two_regions() {
    let result = run(&hard_edge(), SegmentConfig::new().with_workers(2));

    assert_eq!(result.region_count(), 2);
    for y in 0..4 {
        assert_eq!(result.output.row(y), &[0, 0, 2, 2]);
    }
}

#[test]
fn test_single_worker_matches_two_worker_partition() {
    let raster = Raster::filled(4, 4, 0);
    let single = run(
        &raster,
        SegmentConfig::new()
            .with_backend(Backend::SharedMemory)
            .with_kernel(KernelKind::Sequential),
    );
    let split = run(&raster, SegmentConfig::new().with_workers(2));

    assert_eq!(single.stats.kernel, KernelKind::Sequential);
    assert!(same_partition(&single.labels, &split.labels));

    let single = run(
        &hard_edge(),
        SegmentConfig::new()
            .with_backend(Backend::SharedMemory)
            .with_kernel(KernelKind::Sequential),
    );
    let split = run(&hard_edge(), SegmentConfig::new().with_workers(2));
    assert!(same_partition(&single.labels, &split.labels));
}

#[test]
fn test_round_budget_insufficiency() {
    // One row per worker: a region spanning all eight bands needs several
    // rounds before the leftmost label reaches the last band.
    let raster = Raster::filled(4, 8, 0);
    let fixed = run(
        &raster,
        SegmentConfig::new()
            .with_workers(8)
            .with_convergence(ConvergencePolicy::fixed(1)),
    );
    let stable = run(
        &raster,
        SegmentConfig::new()
            .with_workers(8)
            .with_convergence(ConvergencePolicy::change_driven()),
    );

    assert!(!fixed.stats.converged);
    assert!(stable.stats.converged);
    assert_eq!(stable.region_count(), 1);
    assert!(fixed.region_count() > stable.region_count());
    assert!(stable.stats.rounds > 1);
}

#[test]
fn test_repeated_runs_are_byte_identical() {
    let raster = Raster::from_fn(12, 9, |x, y| ((x / 3) * 60 + (y / 3) * 7) as u8);
    let configs = [
        SegmentConfig::new().with_backend(Backend::SharedMemory),
        SegmentConfig::new().with_workers(3),
        SegmentConfig::new().with_backend(Backend::Hybrid).with_workers(3),
    ];
    for config in configs {
        let backend = config.backend;
        let a = run(&raster, config.clone());
        let b = run(&raster, config);
        assert_eq!(a.output, b.output, "{} output differs between runs", backend);
        assert_eq!(a.labels, b.labels);
    }
}

#[test]
fn test_hybrid_fixed_rounds_are_byte_identical() {
    let raster = Raster::from_fn(64, 128, |x, y| if (x / 3 + y / 5) % 2 == 0 { 20 } else { 200 });
    let config = SegmentConfig::new()
        .with_backend(Backend::Hybrid)
        .with_kernel(KernelKind::Parallel)
        .with_threads(8)
        .with_workers(2)
        .with_convergence(ConvergencePolicy::fixed(2));
    let first = run(&raster, config.clone());
    assert!(!first.stats.converged);
    for _ in 0..30 {
        let again = run(&raster, config.clone());
        assert_eq!(again.output, first.output);
        assert_eq!(again.labels, first.labels);
    }
}

#[test]
fn test_backends_agree_once_stable() {
    let raster = Raster::from_fn(10, 12, |x, y| if (x + 2 * y) % 7 < 3 { 30 } else { 120 });
    let shared = run(&raster, SegmentConfig::new().with_backend(Backend::SharedMemory));
    for backend in [Backend::Distributed, Backend::Hybrid] {
        let split = run(
            &raster,
            SegmentConfig::new()
                .with_backend(backend)
                .with_workers(4)
                .with_convergence(ConvergencePolicy::change_driven()),
        );
        assert_eq!(split.labels, shared.labels, "{} disagrees with shared memory", backend);
        assert_eq!(split.output, shared.output);
    }
}

#[test]
fn test_full_propagation_partition_matches_min_swap() {
    let raster = Raster::from_fn(9, 7, |x, y| ((x * y) % 5 * 40) as u8);
    let min_swap = run(&raster, SegmentConfig::new().with_backend(Backend::SharedMemory));
    let full = run(
        &raster,
        SegmentConfig::new()
            .with_backend(Backend::SharedMemory)
            .with_policy(UnificationPolicy::FullPropagation),
    );
    assert!(same_partition(&min_swap.labels, &full.labels));
}

#[test]
fn test_remainder_rows_are_dropped() {
    let raster = Raster::filled(3, 7, 0);
    let result = run(&raster, SegmentConfig::new().with_workers(3));

    assert_eq!(result.output.dimensions(), (3, 6));
    assert_eq!(result.labels.len(), 18);
    assert_eq!(result.stats.dropped_rows, 1);
}

#[test]
fn test_remainder_rows_rejected_on_request() {
    let raster = Raster::filled(3, 7, 0);
    let err = SegmentationEngine::new(
        SegmentConfig::new()
            .with_workers(3)
            .with_remainder(RemainderPolicy::Reject),
    )
    .run(&raster)
    .unwrap_err();

    assert!(matches!(
        err,
        SegmentError::Partition(PartitionError::Indivisible {
            height: 7,
            workers: 3,
            remainder: 1
        })
    ));
}

#[test]
fn test_modulus_aliases_regions() {
    let raster = Raster::from_fn(4, 1, |x, _| (x * 100) as u8);
    let result = run(&raster, SegmentConfig::new().with_modulus(2));

    assert_eq!(result.labels, vec![0, 1, 2, 3]);
    assert_eq!(result.output.pixels(), &[0, 1, 0, 1]);
    assert_eq!(region_count(&result.labels), 4);
}

#[test]
fn test_threshold_is_strict() {
    let raster = Raster::new(2, 1, vec![0, 10]).unwrap();
    let result = run(&raster, SegmentConfig::new());
    assert_eq!(result.labels, vec![0, 1]);

    let result = run(&raster, SegmentConfig::new().with_threshold(Threshold::new(11).unwrap()));
    assert_eq!(result.labels, vec![0, 0]);
}

#[test]
fn test_zero_round_budget_rejected() {
    let err = SegmentationEngine::new(SegmentConfig::new().with_convergence(ConvergencePolicy::fixed(0)))
        .run(&Raster::filled(2, 2, 0))
        .unwrap_err();
    assert!(matches!(err, SegmentError::Config(ConfigError::NoRounds)));
}

#[test]
fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("edge.pgm");
    let output = dir.path().join("edge_segmented.pgm");
    write_raster(&input, &hard_edge()).unwrap();

    let result = run_file(&input, &output, &SegmentConfig::new().with_workers(2)).unwrap();
    let written = read_raster(&output).unwrap();

    assert_eq!(written, result.output);
    assert!(compare_rasters(&written, &result.output).passed());
}

#[test]
fn test_bad_input_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("color.ppm");
    let output = dir.path().join("out.pgm");
    std::fs::write(&input, b"P6\n1 1\n255\n\x01\x02\x03").unwrap();

    let err = run_file(&input, &output, &SegmentConfig::new()).unwrap_err();
    assert!(err.is_input_error());
    assert!(!output.exists());
}
