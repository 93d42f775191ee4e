//! Exit codes and outputs of the `segmerge` binary.

use segmerge::prelude::*;
use std::path::Path;
use std::process::{Command, Output};

fn segmerge(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_segmerge"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn test_run_writes_output_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("edge.pgm");
    let output = dir.path().join("out.pgm");
    let report = dir.path().join("report.json");
    write_raster(&input, &Raster::from_fn(4, 4, |x, _| if x < 2 { 0 } else { 250 })).unwrap();

    let result = segmerge(&[
        "run",
        path(&input),
        path(&output),
        "--workers",
        "2",
        "--until-stable",
        "--report",
        path(&report),
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let segmented = read_raster(&output).unwrap();
    assert_eq!(segmented.row(3), &[0, 0, 2, 2]);

    let stats: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(stats["workers"], 2);
    assert_eq!(stats["converged"], true);
}

#[test]
fn test_config_file_is_overridden_by_flags() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("ramp.pgm");
    let output = dir.path().join("out.pgm");
    let config = dir.path().join("segmerge.toml");
    write_raster(&input, &Raster::new(3, 1, vec![0, 6, 12]).unwrap()).unwrap();
    std::fs::write(&config, "threshold = 4\nbackend = \"shared_memory\"\n").unwrap();

    let result = segmerge(&["run", path(&input), path(&output), "--config", path(&config)]);
    assert!(result.status.success());
    assert_eq!(read_raster(&output).unwrap().pixels(), &[0, 1, 2]);

    let result = segmerge(&[
        "run",
        path(&input),
        path(&output),
        "--config",
        path(&config),
        "--threshold",
        "7",
    ]);
    assert!(result.status.success());
    assert_eq!(read_raster(&output).unwrap().pixels(), &[0, 0, 0]);
}

#[test]
fn test_compare_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.pgm");
    let b = dir.path().join("b.pgm");
    write_raster(&a, &Raster::filled(2, 2, 9)).unwrap();
    write_raster(&b, &Raster::filled(2, 2, 9)).unwrap();

    let same = segmerge(&["compare", path(&a), path(&b)]);
    assert!(same.status.success());
    assert!(String::from_utf8_lossy(&same.stdout).contains("Validation Passed!"));

    write_raster(&b, &Raster::new(2, 2, vec![9, 9, 9, 8]).unwrap()).unwrap();
    let differ = segmerge(&["compare", path(&a), path(&b)]);
    assert_eq!(differ.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&differ.stdout).contains("Validation Failed!"));
}

#[test]
fn test_usage_errors_exit_2() {
    assert_eq!(segmerge(&[]).status.code(), Some(2));
    assert_eq!(segmerge(&["frobnicate"]).status.code(), Some(2));
    assert_eq!(segmerge(&["run", "only-input.pgm"]).status.code(), Some(2));
    assert_eq!(
        segmerge(&["run", "in.pgm", "out.pgm", "--threshold", "0"]).status.code(),
        Some(2)
    );
    assert_eq!(
        segmerge(&["run", "in.pgm", "out.pgm", "--workers"]).status.code(),
        Some(2)
    );
}

#[test]
fn test_undecodable_input_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("color.ppm");
    let output = dir.path().join("out.pgm");
    std::fs::write(&input, b"P6\n1 1\n255\n\x01\x02\x03").unwrap();

    let result = segmerge(&["run", path(&input), path(&output)]);
    assert_eq!(result.status.code(), Some(1));
    assert!(!output.exists());
}

#[test]
fn test_convert_and_preview() {
    let dir = tempfile::tempdir().unwrap();
    let png = dir.path().join("photo.png");
    let pgm = dir.path().join("photo.pgm");
    let preview = dir.path().join("preview.png");
    image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]))
        .save(&png)
        .unwrap();

    let result = segmerge(&["convert", path(&png), path(&pgm), "--resize", "4x2"]);
    assert!(result.status.success());
    let converted = read_raster(&pgm).unwrap();
    assert_eq!(converted.dimensions(), (4, 2));

    let result = segmerge(&["preview", path(&pgm), path(&pgm), path(&preview)]);
    assert!(result.status.success());
    let joined = image::open(&preview).unwrap();
    assert_eq!((joined.width(), joined.height()), (8, 2));

    let bad = segmerge(&["convert", path(&png), path(&pgm), "--resize", "4by2"]);
    assert_eq!(bad.status.code(), Some(2));
}
