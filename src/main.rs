//! Segmerge CLI - Region-merging Image Segmentation
//!
//! Thin front end over the library: segment a PGM, compare two outputs,
//! convert other formats to PGM and render side-by-side previews.

use anyhow::{bail, Context, Result};
use segmerge::core::codec::{convert_to_raster, side_by_side};
use segmerge::prelude::*;
use std::path::Path;
use std::process::ExitCode;

/// A malformed command line. Exits with status 2.
#[derive(Debug)]
struct UsageError(String);

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

fn usage(message: impl Into<String>) -> anyhow::Error {
    UsageError(message.into()).into()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("segmerge");

    if args.len() < 2 {
        print_usage(program);
        return ExitCode::from(2);
    }

    let result = match args[1].as_str() {
        "run" => run(&args[2..]),
        "compare" => compare(&args[2..]),
        "convert" => convert(&args[2..]),
        "preview" => preview(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage(program);
            Ok(ExitCode::SUCCESS)
        }
        other => Err(usage(format!("Unknown command: {}", other))),
    };

    match result {
        Ok(code) => code,
        Err(e) if e.is::<UsageError>() => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage(program);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage(program: &str) {
    println!("Segmerge v{} - region-merging image segmentation", segmerge::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  run <in.pgm> <out.pgm> [options]       Segment an image");
    println!("  compare <a.pgm> <b.pgm>                Check two images are identical");
    println!("  convert <in> <out.pgm> [--resize WxH]  Convert any image to 8-bit PGM");
    println!("  preview <orig.pgm> <seg.pgm> <out>     Render input and output side by side");
    println!("  help                                   Show this help message");
    println!();
    println!("Run options:");
    println!("  --backend <B>      shared, distributed or hybrid (default: distributed)");
    println!("  --workers <N>      Number of row-band workers (default: 1)");
    println!("  --threshold <T>    Merge when intensities differ by less than T (default: 10)");
    println!("  --rounds <N>       Run exactly N rounds (default: 5)");
    println!("  --until-stable     Run until a round changes nothing");
    println!("  --policy <P>       min_swap or full_propagation (default: min_swap)");
    println!("  --modulus <M>      Output value = label mod M, 1..=256 (default: 256)");
    println!("  --kernel <K>       sequential, parallel or accelerator");
    println!("  --threads <N>      Data-parallel pool size (default: all cores)");
    println!("  --config <file>    Load settings from TOML; flags override it");
    println!("  --report <file>    Write run statistics as JSON");
}

fn run(args: &[String]) -> Result<ExitCode> {
    if args.len() < 2 {
        return Err(usage("run needs an input and an output path"));
    }
    let input = &args[0];
    let output = &args[1];

    let mut config = SegmentConfig::new();
    let mut report_path: Option<&str> = None;

    // --config goes first so explicit flags win over the file
    if let Some(path) = flag_value(&args[2..], "--config")? {
        config = SegmentConfig::load(path).with_context(|| format!("loading {}", path))?;
    }

    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--until-stable" => {
                config.convergence = ConvergencePolicy::change_driven();
                i += 1;
                continue;
            }
            "--backend" | "--workers" | "--threshold" | "--rounds" | "--policy" | "--modulus"
            | "--kernel" | "--threads" | "--config" | "--report" => {}
            other => return Err(usage(format!("Unknown option: {}", other))),
        }

        let value = args
            .get(i + 1)
            .ok_or_else(|| usage(format!("{} needs a value", flag)))?;
        match flag {
            "--backend" => config.backend = value.parse::<Backend>().map_err(|e| usage(format!("{}", e)))?,
            "--workers" => config.workers = parse_number(flag, value)?,
            "--threshold" => {
                config.threshold = Threshold::new(parse_number(flag, value)?)
                    .map_err(|e| usage(e.to_string()))?
            }
            "--rounds" => config.convergence = ConvergencePolicy::fixed(parse_number(flag, value)?),
            "--policy" => config.policy = value.parse::<UnificationPolicy>().map_err(|e| usage(format!("{}", e)))?,
            "--modulus" => config.modulus = parse_number(flag, value)?,
            "--kernel" => config.kernel = Some(value.parse::<KernelKind>().map_err(|e| usage(format!("{}", e)))?),
            "--threads" => config.threads = parse_number(flag, value)?,
            "--report" => report_path = Some(value.as_str()),
            _ => {}
        }
        i += 2;
    }

    config.validate().map_err(|e| usage(e.to_string()))?;

    let segmentation = run_file(input, output, &config)
        .with_context(|| format!("segmenting {}", input))?;
    let stats = &segmentation.stats;
    println!(
        "Segmented {} -> {}: {} region(s), {} round(s), converged: {}",
        input,
        output,
        segmentation.region_count(),
        stats.rounds,
        stats.converged
    );

    if let Some(path) = report_path {
        std::fs::write(path, stats.to_json()?).with_context(|| format!("writing {}", path))?;
        log::info!("Wrote run report to {}", path);
    }
    Ok(ExitCode::SUCCESS)
}

fn compare(args: &[String]) -> Result<ExitCode> {
    if args.len() != 2 {
        return Err(usage("compare needs exactly two images"));
    }
    let a = read_raster(&args[0]).with_context(|| format!("reading {}", args[0]))?;
    let b = read_raster(&args[1]).with_context(|| format!("reading {}", args[1]))?;

    let comparison = compare_rasters(&a, &b);
    println!("{}", comparison);
    Ok(if comparison.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn convert(args: &[String]) -> Result<ExitCode> {
    if args.len() < 2 {
        return Err(usage("convert needs an input and an output path"));
    }
    let resize = match flag_value(&args[2..], "--resize")? {
        Some(value) => Some(
            parse_dimensions(value)
                .ok_or_else(|| usage(format!("Invalid dimensions '{}', expected WxH", value)))?,
        ),
        None => None,
    };

    let raster = convert_to_raster(&args[0], resize).with_context(|| format!("reading {}", args[0]))?;
    write_raster(&args[1], &raster).with_context(|| format!("writing {}", args[1]))?;
    println!(
        "Converted {} -> {} ({}x{})",
        args[0],
        args[1],
        raster.width(),
        raster.height()
    );
    Ok(ExitCode::SUCCESS)
}

fn preview(args: &[String]) -> Result<ExitCode> {
    if args.len() != 3 {
        return Err(usage("preview needs the original, the segmented image and an output path"));
    }
    let original = read_raster(&args[0]).with_context(|| format!("reading {}", args[0]))?;
    let segmented = read_raster(&args[1]).with_context(|| format!("reading {}", args[1]))?;
    let joined = side_by_side(&original, &segmented);

    let output = Path::new(&args[2]);
    let is_pgm = output
        .extension()
        .map_or(true, |ext| ext.eq_ignore_ascii_case("pgm"));
    if is_pgm {
        write_raster(output, &joined)?;
    } else {
        let (width, height) = (joined.width() as u32, joined.height() as u32);
        let Some(image) = image::GrayImage::from_raw(width, height, joined.into_pixels()) else {
            bail!("preview of {}x{} does not fit an image buffer", width, height);
        };
        image
            .save(output)
            .with_context(|| format!("writing {}", output.display()))?;
    }
    println!("Preview saved to: {}", output.display());
    Ok(ExitCode::SUCCESS)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| usage(format!("{} needs a value", flag))),
        None => Ok(None),
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| usage(format!("{} expects a number, got '{}'", flag, value)))
}

fn parse_dimensions(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}
