//! Recompress an image over and over at random lossy quality and save
//! what is left of it.
//!
//! Usage:
//!   recompress photo.png -o crushed.png -n 500
//!   recompress photo.png --format random --frames-dir frames --every 10
//!   recompress photo.png --compare split.png --split 40
//!   RUST_LOG=debug recompress photo.png --seed 7
//!
//! Every applied iteration is logged at `info`. Encode failures are
//! logged and skipped; only load, config and file errors are fatal.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, ValueEnum};
use image::buffer::ConvertBuffer;
use image::{ImageFormat as FileFormat, RgbImage};
use recompress_pipeline::{
    Format, ImageCodec, QualityRange, RecompressConfig, RgbaImage, compare, load,
};
use recompress_worker::DriverEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error>;

/// Repeatedly re-encode an image as JPEG and/or WebP at randomly
/// sampled quality, feeding each output back in as the next input.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Input image (PNG, JPEG, BMP or WebP).
    input: PathBuf,

    /// Where to write the final image. The format follows the extension.
    #[arg(short, long, default_value = "recompressed.png")]
    output: PathBuf,

    /// Number of successful iterations to run. Ignored when
    /// `--config-json` sets `iteration_limit`.
    #[arg(short = 'n', long, default_value_t = 100, value_parser = RangedU64ValueParser::<u64>::new().range(1..))]
    iterations: u64,

    /// Lower bound of the quality range (0.0 to 1.0).
    #[arg(long, default_value_t = RecompressConfig::DEFAULT_MIN_QUALITY)]
    min_quality: f64,

    /// Upper bound of the quality range (0.0 to 1.0).
    #[arg(long, default_value_t = RecompressConfig::DEFAULT_MAX_QUALITY)]
    max_quality: f64,

    /// Output format of each iteration.
    #[arg(long, value_enum, default_value_t = FormatArg::Jpeg)]
    format: FormatArg,

    /// Delay between an iteration finishing and the next one starting.
    #[arg(long, value_name = "MS", default_value_t = RecompressConfig::DEFAULT_FRAME_INTERVAL_MS)]
    interval_ms: u64,

    /// Downscale the input to at most this width before starting.
    #[arg(long, default_value_t = RecompressConfig::DEFAULT_MAX_WIDTH, value_parser = RangedU64ValueParser::<u32>::new().range(1..))]
    max_width: u32,

    /// Seed for quality and format sampling. Random if omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Save intermediate frames as PNG into this directory.
    #[arg(long, value_name = "DIR")]
    frames_dir: Option<PathBuf>,

    /// With `--frames-dir`, save every Nth iteration.
    #[arg(long, value_name = "N", default_value_t = 1, value_parser = RangedU64ValueParser::<u64>::new().range(1..))]
    every: u64,

    /// Also write a side-by-side comparison: compressed on the left,
    /// original on the right.
    #[arg(long, value_name = "PATH")]
    compare: Option<PathBuf>,

    /// Divider position for `--compare`, as a percentage of the width.
    #[arg(long, value_name = "PERCENT", default_value_t = 50.0)]
    split: f64,

    /// Full `RecompressConfig` as JSON. When provided, the quality,
    /// format, interval and width flags are ignored.
    #[arg(long)]
    config_json: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Jpeg,
    Webp,
    /// Pick JPEG or WebP independently for each iteration.
    Random,
}

impl From<FormatArg> for Format {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Jpeg => Self::Jpeg,
            FormatArg::Webp => Self::Webp,
            FormatArg::Random => Self::Random,
        }
    }
}

/// Build a [`RecompressConfig`] from CLI arguments.
///
/// `--config-json` wins over the individual flags. The iteration limit
/// falls back to `--iterations` when the JSON does not set one.
fn config_from_cli(cli: &Cli) -> Result<RecompressConfig, String> {
    let mut config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        RecompressConfig {
            quality: QualityRange::new(cli.min_quality, cli.max_quality)
                .map_err(|e| format!("--min-quality / --max-quality: {e}"))?,
            format: cli.format.into(),
            frame_interval_ms: cli.interval_ms,
            max_width: cli.max_width,
            iteration_limit: None,
        }
    };
    if config.iteration_limit.is_none() {
        config.iteration_limit = Some(cli.iterations);
    }
    Ok(config)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// The file format `path`'s extension names, if this build can write it.
fn output_format(path: &Path) -> Result<FileFormat, BoxError> {
    let format = FileFormat::from_path(path)
        .map_err(|e| format!("{}: {e}", path.display()))?;
    if !format.writing_enabled() {
        return Err(format!("{}: cannot write {format:?} images", path.display()).into());
    }
    Ok(format)
}

/// Write `image` in the format its extension names. JPEG has no alpha
/// channel, so it is flattened to RGB first.
fn save_image(image: &RgbaImage, path: &Path) -> Result<(), BoxError> {
    let format = output_format(path)?;
    if format == FileFormat::Jpeg {
        let rgb: RgbImage = image.convert();
        rgb.save_with_format(path, format)?;
    } else {
        image.save_with_format(path, format)?;
    }
    Ok(())
}

fn save_frame(dir: &Path, count: u64, image: &RgbaImage) -> Result<(), BoxError> {
    save_image(image, &dir.join(format!("frame-{count:06}.png")))
}

async fn run(cli: Cli, config: RecompressConfig) -> Result<(), BoxError> {
    // Reject unwritable output paths before spending time on iterations.
    output_format(&cli.output)?;
    if let Some(ref path) = cli.compare {
        output_format(path)?;
    }

    let bytes = std::fs::read(&cli.input)
        .map_err(|e| format!("Error reading {}: {e}", cli.input.display()))?;
    let original = load::load_image(&bytes, config.max_width)?;
    info!(
        "loaded {} ({} bytes) as {}×{}",
        cli.input.display(),
        bytes.len(),
        original.width(),
        original.height(),
    );

    if let Some(ref dir) = cli.frames_dir {
        std::fs::create_dir_all(dir)?;
    }

    let target = config.iteration_limit.unwrap_or(cli.iterations);
    info!(
        "running {target} iterations: quality {}, format {}, interval {:?}",
        config.quality,
        config.format,
        Duration::from_millis(config.frame_interval_ms),
    );

    let (driver, task) = recompress_worker::spawn(&config, Arc::new(ImageCodec), cli.seed)?;
    let mut events = driver.subscribe();
    driver.select_image(original).await?;
    driver.set_iterating(true).await?;

    let mut failures = 0_u64;
    loop {
        match events.recv().await {
            Ok(DriverEvent::Applied { count, image, .. }) => {
                if let Some(ref dir) = cli.frames_dir
                    && count % cli.every == 0
                {
                    save_frame(dir, count, &image)?;
                }
            }
            Ok(DriverEvent::Failed { .. }) => failures += 1,
            Ok(DriverEvent::Discarded { .. }) => {}
            Ok(DriverEvent::Stopped) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => {
                warn!("fell behind the driver, {skipped} events skipped");
            }
        }
    }

    let snapshot = driver.snapshot();
    driver.shutdown().await?;
    task.await?;

    let original = snapshot
        .original
        .ok_or("driver finished without a source image")?;
    let result = snapshot.compressed.unwrap_or_else(|| {
        warn!("no iteration succeeded, writing the original");
        Arc::clone(&original)
    });

    save_image(&result, &cli.output)?;
    info!(
        "wrote {} after {} iterations ({failures} failed)",
        cli.output.display(),
        snapshot.stats.count,
    );

    if let Some(ref path) = cli.compare {
        let split = compare::split_comparison(&original, &result, cli.split / 100.0)?;
        save_image(&split, path)?;
        info!("wrote comparison {}", path.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            error!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A fresh, empty directory under the system temp dir.
    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("recompress-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[allow(clippy::cast_possible_truncation)]
    fn gradient() -> RgbaImage {
        RgbaImage::from_fn(24, 16, |x, y| {
            image::Rgba([(x * 10) as u8, (y * 15) as u8, 128, 200])
        })
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("recompress").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_build_the_config() {
        let cli = parse(&[
            "in.png",
            "--min-quality",
            "0.1",
            "--max-quality",
            "0.2",
            "--format",
            "random",
            "--interval-ms",
            "5",
            "-n",
            "42",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.quality, QualityRange::new(0.1, 0.2).unwrap());
        assert_eq!(config.format, Format::Random);
        assert_eq!(config.frame_interval_ms, 5);
        assert_eq!(config.max_width, RecompressConfig::DEFAULT_MAX_WIDTH);
        assert_eq!(config.iteration_limit, Some(42));
    }

    #[test]
    fn defaults_match_the_config_defaults() {
        let config = config_from_cli(&parse(&["in.png"])).unwrap();
        let expected = RecompressConfig {
            iteration_limit: Some(100),
            ..RecompressConfig::default()
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn inverted_quality_range_is_rejected() {
        let cli = parse(&["in.png", "--min-quality", "0.9", "--max-quality", "0.1"]);
        assert!(config_from_cli(&cli).is_err());
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = parse(&[
            "in.png",
            "--format",
            "jpeg",
            "-n",
            "7",
            "--config-json",
            r#"{"quality":[0.5,0.6],"format":"webp"}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.format, Format::Webp);
        assert_eq!(config.quality, QualityRange::new(0.5, 0.6).unwrap());
        assert_eq!(config.iteration_limit, Some(7), "limit falls back to -n");

        let cli = parse(&["in.png", "--config-json", r#"{"iteration_limit":3}"#]);
        assert_eq!(config_from_cli(&cli).unwrap().iteration_limit, Some(3));
    }

    #[test]
    fn malformed_config_json_is_rejected() {
        let cli = parse(&["in.png", "--config-json", "{not json"]);
        assert!(config_from_cli(&cli).is_err());
    }

    #[test]
    fn saves_png_and_jpeg_by_extension() {
        let dir = scratch_dir("save");
        let image = gradient();

        for name in ["out.png", "out.jpg", "out.jpeg", "out.webp", "out.bmp"] {
            let path = dir.join(name);
            save_image(&image, &path).unwrap();
            let written = image::open(&path).unwrap();
            assert_eq!(
                (written.width(), written.height()),
                (24, 16),
                "{name} has the wrong size"
            );
        }

        let png = image::open(dir.join("out.png")).unwrap().into_rgba8();
        assert_eq!(png.as_raw(), image.as_raw(), "PNG keeps every pixel");
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        assert!(output_format(Path::new("out.xyz")).is_err());
        assert!(output_format(Path::new("no-extension")).is_err());
        assert_eq!(
            output_format(Path::new("dir/OUT.JPG")).unwrap(),
            FileFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn run_writes_output_frames_and_comparison() {
        let dir = scratch_dir("run");
        let input = dir.join("in.png");
        gradient().save(&input).unwrap();
        let output = dir.join("final.jpg");
        let split = dir.join("split.jpg");
        let frames = dir.join("frames");

        let cli = parse(&[
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "-n",
            "4",
            "--interval-ms",
            "0",
            "--seed",
            "9",
            "--frames-dir",
            frames.to_str().unwrap(),
            "--every",
            "2",
            "--compare",
            split.to_str().unwrap(),
        ]);
        let config = config_from_cli(&cli).unwrap();
        run(cli, config).await.unwrap();

        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (24, 16));
        let comparison = image::open(&split).unwrap();
        assert_eq!((comparison.width(), comparison.height()), (24, 16));

        let mut saved: Vec<String> = std::fs::read_dir(&frames)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        saved.sort();
        assert_eq!(saved, vec!["frame-000002.png", "frame-000004.png"]);
    }

    #[tokio::test]
    async fn run_rejects_unwritable_output_before_iterating() {
        let dir = scratch_dir("reject");
        let input = dir.join("in.png");
        gradient().save(&input).unwrap();
        let output = dir.join("final.xyz");

        let cli = parse(&[input.to_str().unwrap(), "-o", output.to_str().unwrap()]);
        let config = config_from_cli(&cli).unwrap();
        assert!(run(cli, config).await.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn zero_iterations_is_rejected_by_clap() {
        assert!(Cli::try_parse_from(["recompress", "in.png", "-n", "0"]).is_err());
    }
}
