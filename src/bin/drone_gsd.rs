// drone_gsd - ground sample distance calibration CLI
// Resolves camera parameters and distance for each image and prints a JSON report

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use drone_gsd::{calibrate_batch, ConfidenceLevel, ResolverConfig, TargetLocation};

#[derive(Parser)]
#[command(name = "drone_gsd", version, about = "Ground sample distance from drone photo metadata")]
struct Args {
    /// Images to calibrate
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// ExifTool executable
    #[arg(long)]
    exiftool: Option<PathBuf>,

    /// Skip the ExifTool backend entirely
    #[arg(long)]
    no_exiftool: bool,

    /// Target (tower) latitude in decimal degrees
    #[arg(long, allow_negative_numbers = true, requires_all = ["target_lon", "target_alt"])]
    target_lat: Option<f64>,

    /// Target (tower) longitude in decimal degrees
    #[arg(long, allow_negative_numbers = true, requires_all = ["target_lat", "target_alt"])]
    target_lon: Option<f64>,

    /// Target base altitude above mean sea level, metres
    #[arg(long, allow_negative_numbers = true, requires_all = ["target_lat", "target_lon"])]
    target_alt: Option<f64>,

    /// Include the per-field diagnostic trace
    #[arg(long)]
    trace: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level))
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => ResolverConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ResolverConfig::default(),
    };
    if let Some(exiftool) = &args.exiftool {
        config.exiftool_path = exiftool.clone();
    }
    if args.no_exiftool {
        config = config.without_exiftool();
    }

    let target = match (args.target_lat, args.target_lon, args.target_alt) {
        (Some(latitude), Some(longitude), Some(base_altitude_m)) => Some(TargetLocation {
            latitude,
            longitude,
            base_altitude_m,
        }),
        _ => None,
    };

    info!("📐 Calibrating {} image(s)", args.paths.len());
    if let Some(t) = &target {
        info!("   Target: {:.6}, {:.6} @ {:.1} m MSL", t.latitude, t.longitude, t.base_altitude_m);
    }

    let results = calibrate_batch(&args.paths, target.as_ref(), &config)
        .context("Invalid configuration")?;

    let mut failures = 0usize;
    let mut output = Vec::with_capacity(results.len());
    for (path, result) in results {
        match result {
            Ok(report) => {
                let mut value = serde_json::to_value(&report).context("Failed to serialize report")?;
                if !args.trace {
                    if let Value::Object(map) = &mut value {
                        map.remove("diagnostics");
                    }
                }
                output.push(value);
            }
            Err(e) => {
                failures += 1;
                error!("{}: {}", path.display(), e);
                output.push(json!({
                    "path": path,
                    "confidence": ConfidenceLevel::Failed,
                    "error": e.to_string(),
                }));
            }
        }
    }

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", rendered);

    info!("   ✓ {} calibrated, {} failed", output.len() - failures, failures);
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
